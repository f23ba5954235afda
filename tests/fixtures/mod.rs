//! Reusable endpoint topologies

mod request_reply;

pub use request_reply::RequestReplyFixture;
