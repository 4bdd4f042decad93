// Storefront walkthrough
//
// Sends a page view, a product detail event and a purchase to the endpoint
// named by TRACKLINE_ENDPOINT (see AnalyticsConfig::from_env), then flushes.
//
// Run with: cargo run -p trackline-plugins --example storefront

use serde_json::json;
use trackline_core::AnalyticsConfig;
use trackline_plugins::AnalyticsContext;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let context = AnalyticsContext::new(AnalyticsConfig::from_env()?)?;
    context.require("ec")?;
    context.set("currencyCode", json!("EUR"));

    context.send("pageview", vec![json!("/kayaks/c0v30")]).await?;

    context.run(
        "ec:addProduct",
        vec![json!({"id": "C0V30", "name": "Sea Kayak", "price": 899.0, "quantity": "1"})],
    )?;
    context.run("ec:setAction", vec![json!("detail")])?;
    context
        .send("event", vec![json!("product"), json!("detail")])
        .await?;

    context.run(
        "ec:addProduct",
        vec![json!({"id": "C0V30", "name": "Sea Kayak", "price": 899.0, "quantity": "1"})],
    )?;
    context.run(
        "ec:setAction",
        vec![json!("purchase"), json!({"id": "T-1001", "revenue": 899.0})],
    )?;
    let pending = context.send("event", vec![json!("checkout"), json!("purchase")]);

    let visitor = context.dispatcher().get_current_visitor_id().await?;
    tracing::info!(visitor = %visitor, "Purchase queued");
    pending.await?;

    let flushed = context.dispatcher().flush_on_terminate().await;
    tracing::info!(flushed, "Done");
    Ok(())
}
