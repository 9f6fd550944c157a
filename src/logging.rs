//! バイナリ用のログ初期化

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// ログ出力を初期化します。
///
/// `RUST_LOG` でフィルタを指定でき、`LOG_FORMAT=json` でJSON出力になります。
/// ライブラリ側の `log` マクロの出力もここに流れます。
pub fn init_logging() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("target_finder=info,tower_http=info"));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = if use_json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };
    if let Err(e) = result {
        eprintln!("logging already initialized: {}", e);
    }
}
