pub mod radio_receiver;
pub mod receive_session;
pub mod reorder_buffer;
pub mod rexmit_scheduler;
pub mod state_manager;
pub mod station;
pub mod station_directory;
pub mod ui;
