// handlers/mod.rs - HTTP handlers
//
// public:    no authentication (health)
// protected: JWT required; every data access goes through the access resolver

pub mod protected;
pub mod public;
