pub mod crosspath;

pub mod correlator;
pub mod db;
pub mod error;
pub mod grpc_util;
pub mod keys;
pub mod rate_counter;
pub mod tool;
pub mod zones;
