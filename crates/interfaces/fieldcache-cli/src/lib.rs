pub mod commands;
pub mod context;

use clap::ValueEnum;
use fieldcache_config::clamp_attempts;
use fieldcache_pipeline::RetryPolicy;

#[derive(ValueEnum, Clone, Debug, Copy, Default)]
pub enum CliRetry {
    #[default]
    Default,
    Aggressive,
    Conservative,
}

impl From<CliRetry> for RetryPolicy {
    fn from(r: CliRetry) -> Self {
        match r {
            CliRetry::Default => RetryPolicy::DEFAULT,
            CliRetry::Aggressive => RetryPolicy::AGGRESSIVE,
            CliRetry::Conservative => RetryPolicy::CONSERVATIVE,
        }
    }
}

/// Preset policy, with `--retry-attempts` overriding its attempt count.
pub fn retry_policy(preset: CliRetry, attempts: Option<u32>) -> RetryPolicy {
    let mut policy = RetryPolicy::from(preset);
    if let Some(attempts) = attempts {
        policy.max_attempts = clamp_attempts(attempts);
    }
    policy
}
