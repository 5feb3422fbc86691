//! Domain model: value objects, entities, pure policy and the ports the
//! application layer drives.

pub mod gateway;
pub mod money;
pub mod policy;
pub mod ports;
pub mod routing;
pub mod transaction;
pub mod wallet;
