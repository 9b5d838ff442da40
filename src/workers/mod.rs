pub mod session_sweeper;
pub mod side_effect_worker;
