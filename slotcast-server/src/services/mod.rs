pub mod campaign_expiry;
pub mod heartbeat_monitor;
pub mod moderation;
pub mod playlist_snapshot;
pub mod propagator;
pub mod slot_allocator;
pub mod slot_store;

#[cfg(test)]
pub mod test_support;
