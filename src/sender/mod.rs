pub mod radio_sender;
pub mod resend_queue;
pub mod sent_cache;
