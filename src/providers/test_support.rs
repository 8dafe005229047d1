//! Mock providers for process-level tests.
//!
//! Providers are small `sh` scripts. Request ids are pulled out of each line
//! with `sed`; this relies on requests serializing `jsonrpc` then `id` first.

use std::time::Duration;

use super::lifecycle::SpawnOptions;
use super::transport::TransportOptions;
use super::types::ProviderConfig;
use crate::config::HostSettings;

/// Answers `initialize`, `tools/list` (one tool, `charge`) and `tools/call`
/// (echoes the called tool name). Anything else gets a method-not-found error.
const MOCK_PROVIDER: &str = r#"
echo "mock provider ready" >&2
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/^{"jsonrpc":"2.0","id":"\([^"]*\)".*/\1/p')
  [ -z "$id" ] && continue
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":"%s","result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"mock","version":"0.1.0"}}}\n' "$id" ;;
    *'"method":"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":"%s","result":{"tools":[{"name":"charge","description":"Create a charge","inputSchema":{"type":"object","properties":{"amount":{"type":"integer"}}}}]}}\n' "$id" ;;
    *'"method":"tools/call"'*)
      tool=$(printf '%s' "$line" | sed -n 's/.*"name":"\([^"]*\)".*/\1/p')
      printf '{"jsonrpc":"2.0","id":"%s","result":{"content":[{"type":"text","text":"called %s"}]}}\n' "$id" "$tool" ;;
    *)
      printf '{"jsonrpc":"2.0","id":"%s","error":{"code":-32601,"message":"Method not found"}}\n' "$id" ;;
  esac
done
"#;

/// A provider config running `script` under `sh -c`.
pub(crate) fn sh_provider(name: &str, script: &str) -> ProviderConfig {
    ProviderConfig::custom(name, "sh", vec!["-c".to_string(), script.to_string()])
}

/// A well-behaved mock provider named `name`.
pub(crate) fn mock_provider(name: &str) -> ProviderConfig {
    sh_provider(name, MOCK_PROVIDER)
}

/// A provider that reads requests but never answers them. Stdout stays open
/// so requests time out instead of seeing end-of-stream.
pub(crate) fn silent_provider(name: &str) -> ProviderConfig {
    sh_provider(
        name,
        "echo 'Error: STRIPE_SECRET_KEY not set' >&2; while read -r _; do :; done",
    )
}

/// Spawn options with the given request timeout and default log settings.
pub(crate) fn options(timeout_ms: u64) -> SpawnOptions {
    SpawnOptions {
        transport: TransportOptions {
            timeout: Duration::from_millis(timeout_ms),
            log_context_lines: 5,
        },
        log_capacity: 100,
    }
}

/// Host settings with a short timeout and grace period.
pub(crate) fn fast_settings(timeout_ms: u64) -> HostSettings {
    HostSettings {
        request_timeout_ms: timeout_ms,
        shutdown_grace_ms: 300,
        ..HostSettings::default()
    }
}
