//! `parley onboard`: first-time setup.

use parley_config::AppConfig;

const ACL_TEMPLATE: &str = concat!(
    "# Who may talk to the bot. Ids are namespaced: tg-<telegram id>.\n",
    "# Group chats have negative ids, e.g. \"tg--100123456\".\n\n",
    "[allowed_user_id]\n",
    "# \"tg-12345\" = true\n",
    "allow_all = false\n\n",
    "[allowed_chat_id]\n",
    "# \"tg--100123456\" = true\n",
    "allow_all = false\n",
);

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");
    let acl_path = config_dir.join("acl.toml");

    println!("Parley: First-Time Setup");
    println!("========================\n");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
        println!("✅ Created config directory: {}", config_dir.display());
    } else {
        println!("  Config directory exists: {}", config_dir.display());
    }

    if config_path.exists() {
        println!("\n⚠️  Config already exists at: {}", config_path.display());
        println!("   Edit it manually or delete and re-run onboard.\n");
    } else {
        std::fs::write(&config_path, AppConfig::default_toml())?;
        println!("✅ Created config.toml at: {}", config_path.display());
    }

    if acl_path.exists() {
        println!("  Access list exists: {}", acl_path.display());
    } else {
        std::fs::write(&acl_path, ACL_TEMPLATE)?;
        println!("✅ Created acl.toml at: {}", acl_path.display());
    }

    println!("\n📝 Next steps:");
    println!("   1. Put your OpenAI key and Telegram bot token in {}", config_path.display());
    println!("      (or export OPENAI_API_KEY and TELEGRAM_BOT_TOKEN)");
    println!("   2. List allowed users in {}", acl_path.display());
    println!("   3. Run: parley doctor, then parley run\n");

    Ok(())
}
