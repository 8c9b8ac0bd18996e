//! `parley doctor`: diagnose configuration and collaborators.

use parley_channels::{ChannelRegistry, TelegramChannel, TelegramSettings};
use parley_config::{AclConfig, AppConfig};
use parley_providers::build_from_config;
use parley_providers::speech::FfmpegTranscoder;
use std::sync::Arc;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("Parley Doctor: System Diagnostics");
    println!("=================================\n");

    let mut issues = 0;

    let config_path = AppConfig::config_dir().join("config.toml");
    if !config_path.exists() {
        println!("  ⚠️  No config file, using defaults (run `parley onboard`)");
        issues += 1;
    }

    let config = match AppConfig::load() {
        Ok(config) => {
            println!("  ✅ Configuration valid");
            config
        }
        Err(e) => {
            println!("  ❌ Configuration invalid: {e}");
            println!("\n  ⚠️  1 blocking issue found.");
            return Ok(());
        }
    };

    let provider_name = if config.system.use_gemini { "Gemini" } else { "OpenAI" };
    if config.has_provider_key() {
        println!("  ✅ {provider_name} API key configured");
        match build_from_config(&config) {
            Ok(setup) => match setup.provider.health_check().await {
                Ok(true) => println!("  ✅ {provider_name} reachable"),
                Ok(false) => {
                    println!("  ❌ {provider_name} rejected the health check (key or model?)");
                    issues += 1;
                }
                Err(e) => {
                    println!("  ❌ {provider_name} unreachable: {e}");
                    issues += 1;
                }
            },
            Err(e) => {
                println!("  ❌ {provider_name} setup failed: {e}");
                issues += 1;
            }
        }
    } else {
        println!("  ❌ No {provider_name} API key, set it in config.toml or the environment");
        issues += 1;
    }

    match TelegramSettings::from_config(&config.telegram) {
        Ok(settings) => {
            let mut registry = ChannelRegistry::new();
            registry.register(Arc::new(TelegramChannel::new(settings).without_polling()));
            for (name, healthy) in registry.health_check_all().await {
                if healthy {
                    println!("  ✅ {name}: bot token accepted");
                } else {
                    println!("  ❌ {name}: getMe failed, check the bot token");
                    issues += 1;
                }
            }
        }
        Err(_) => {
            println!("  ⚠️  No Telegram bot token, only `parley run --console` will work");
            issues += 1;
        }
    }

    match AclConfig::load() {
        Ok(acl) if config.system.whitelist_enabled => {
            let users = acl.allowed_user_id.values().filter(|allowed| **allowed).count();
            let chats = acl.allowed_chat_id.values().filter(|allowed| **allowed).count();
            println!("  ✅ Access list loaded ({users} user entries, {chats} chat entries)");
        }
        Ok(_) => println!("  ⚠️  Allowlist disabled, everyone may use the bot"),
        Err(e) => {
            println!("  ❌ Access list invalid: {e}");
            issues += 1;
        }
    }

    if FfmpegTranscoder::new(&config.speech.ffmpeg_path).is_available().await {
        println!("  ✅ ffmpeg available for voice messages");
    } else {
        println!("  ⚠️  ffmpeg not found at `{}`, voice messages will be ignored", config.speech.ffmpeg_path);
        issues += 1;
    }

    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
