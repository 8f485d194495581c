pub mod desk_service;
pub mod snapshot_poller;
