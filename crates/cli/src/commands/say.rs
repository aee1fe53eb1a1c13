//! `earshot say` — Append a transcript fragment, as a transcriber would.

use chrono::Utc;
use earshot_core::types::{Feature, TranscriptFragment};

use super::{load_config, open_store};

pub async fn run(
    user: &str,
    device: Option<String>,
    language: Option<String>,
    enable: bool,
    text: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let store = open_store(&config, false).await?;

    if enable {
        store.set_feature(user, Feature::ExplicitAgent, true).await?;
        println!("✅ Enabled {} for {user}", Feature::ExplicitAgent);
    }

    let mut fragment = TranscriptFragment::new(user, text, Utc::now());
    fragment.device_id = device;
    fragment.language = language;
    store.append_transcript(fragment).await?;

    println!("🗣️  {user}: {text}");
    Ok(())
}
