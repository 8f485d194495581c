pub mod signal_channel;
