pub mod config;
pub mod gc;
pub mod pusher;
pub mod request_handler;
pub mod seeker;
