//! `earshot insights` — Read a user's answers.

use earshot_core::types::InsightRecord;

use super::{load_config, open_store};

pub async fn run(user: &str, all: bool, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let store = open_store(&config, false).await?;

    let insights = if all {
        store.insights(user).await?
    } else {
        store.take_unconsumed_insights(user).await?
    };

    if json {
        for insight in &insights {
            println!("{}", serde_json::to_string(insight)?);
        }
        return Ok(());
    }

    if insights.is_empty() {
        println!("📭 No {}insights for {user}", if all { "" } else { "new " });
        return Ok(());
    }

    println!("💡 Insights for {user} ({})", insights.len());
    for insight in &insights {
        println!("{}", render(insight));
    }
    Ok(())
}

fn render(insight: &InsightRecord) -> String {
    format!(
        "\n  [{}]{}\n  Q: {}\n  A: {}",
        insight.created_at.format("%Y-%m-%d %H:%M:%S"),
        if insight.consumed { " (read)" } else { "" },
        insight.query,
        insight.insight
    )
}
