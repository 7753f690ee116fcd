// RFC 7234 HTTP response cache library

pub mod cache;
pub mod constants;
pub mod logging;
