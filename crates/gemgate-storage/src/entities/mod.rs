pub mod kv_state;

pub use kv_state::Entity as KvState;
