use crate::config::types::Config;

pub fn validate(config: &Config) -> Result<(), String> {
    if config.interface.trim().is_empty() {
        return Err("interface cannot be empty (use \"auto\" to auto-detect)".into());
    }
    if config.idle_timeout_ms == 0 {
        return Err("idle_timeout_ms must be > 0".into());
    }
    if config.channel_capacity == 0 {
        return Err("channel_capacity must be > 0".into());
    }
    Ok(())
}
