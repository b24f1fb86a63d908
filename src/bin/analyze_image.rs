use anyhow::{bail, Context, Result};
use fake_detector_lib::init_logging;
use fake_detector_lib::models::AnalysisResult;
use fake_detector_lib::services::{AnalysisOrchestrator, ConfigStore, PersistOutcome, ResultStore};
use serde_json::{Map, Value};

const USAGE: &str = "Usage:\n  analyze_image <image_path> [--mode commercial|remote_inference] [--remote-url <url>] [--no-save] [--out <json_path>]\n  analyze_image [--health] [--history <n>] [--stats] [--out <json_path>]\n\nNotes:\n  - Commercial credentials come from SIGHTENGINE_API_USER / SIGHTENGINE_API_SECRET or the config file.\n  - History requires FAKEDETECTOR_DB_API_KEY (or resultStore.apiKey in the config file).";

fn parse_arg_value(args: &[String], key: &str) -> Option<String> {
    args.iter()
        .position(|a| a == key)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn has_flag(args: &[String], key: &str) -> bool {
    args.iter().any(|a| a == key)
}

fn print_result(result: &AnalysisResult, outcome: &PersistOutcome) {
    println!("Image: {}", result.image_ref);
    println!("Mode: {}", result.analysis_mode);
    println!("Prediction: {} ({}%)", result.prediction, result.confidence);
    println!(
        "Probabilities: real={} fake={}",
        result.probabilities.real, result.probabilities.fake
    );
    println!("Raw score: {:.4}", result.raw_score);
    println!("Model: {} ({})", result.model_used, result.model_author);
    println!("Processing time: {}ms", result.total_processing_time);
    match outcome {
        PersistOutcome::Saved(id) => println!("Saved: id={}", id),
        PersistOutcome::Skipped => println!("Saved: skipped"),
        PersistOutcome::Failed(reason) => println!("Saved: failed ({})", reason),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 || has_flag(&args, "--help") {
        eprintln!("{}", USAGE);
        return Ok(());
    }

    let image_path = args.get(1).filter(|a| !a.starts_with("--")).cloned();
    let run_health = has_flag(&args, "--health");
    let run_stats = has_flag(&args, "--stats");
    let history_limit = parse_arg_value(&args, "--history")
        .map(|n| n.parse::<u32>().context("--history expects a number"))
        .transpose()?;
    let out_path = parse_arg_value(&args, "--out");

    if image_path.is_none() && !run_health && !run_stats && history_limit.is_none() {
        eprintln!("{}", USAGE);
        bail!("nothing to do");
    }

    init_logging();

    let config_dir = ConfigStore::default_config_dir().context("no config directory available")?;
    let config_store = ConfigStore::new(config_dir);
    let config = config_store.load_effective().context("failed to load config")?;
    let user_id = config_store.load_or_create_user_id();

    let orchestrator = AnalysisOrchestrator::from_config(&config, &user_id);
    if let Some(mode) = parse_arg_value(&args, "--mode") {
        if !orchestrator.set_mode(&mode) {
            bail!("unknown mode '{}' (expected commercial or remote_inference)", mode);
        }
    }
    if let Some(url) = parse_arg_value(&args, "--remote-url") {
        orchestrator.set_remote_inference_base_url(Some(url));
    }
    if has_flag(&args, "--no-save") {
        orchestrator.set_auto_save(false);
    }

    let mut output = Map::new();
    output.insert("userId".to_string(), Value::from(user_id.clone()));

    if run_health {
        let health = orchestrator.check_health().await;
        println!(
            "Health ({}): {}",
            health.mode(),
            if health.is_healthy() { "ok" } else { "error" }
        );
        output.insert("health".to_string(), serde_json::to_value(&health)?);
    }

    if run_stats || history_limit.is_some() {
        let store = ResultStore::new(&config.result_store, user_id.clone())
            .context("result store unavailable")?;

        if let Some(limit) = history_limit {
            let records = store.fetch_history(limit, 0).await?;
            println!("History: {} records", records.len());
            for r in &records {
                println!(
                    "  [{}] {} {:.0}% mode={} feedback={}",
                    r.id,
                    r.prediction,
                    r.confidence,
                    r.analysis_mode.as_deref().unwrap_or("-"),
                    r.user_feedback.map(|f| f.as_str()).unwrap_or("-")
                );
            }
            output.insert("history".to_string(), serde_json::to_value(&records)?);
        }

        if run_stats {
            let stats = store.fetch_statistics().await?;
            println!("Statistics: {}", serde_json::to_string(&stats)?);
            output.insert("statistics".to_string(), serde_json::to_value(&stats)?);
        }
    }

    if let Some(path) = image_path {
        let (result, outcome) = orchestrator
            .analyze_image_detailed(&path)
            .await
            .with_context(|| format!("analysis failed for {}", path))?;
        print_result(&result, &outcome);
        output.insert("result".to_string(), serde_json::to_value(&result)?);
    }

    if let Some(out_path) = out_path {
        let json = serde_json::to_string_pretty(&Value::Object(output))?;
        std::fs::write(&out_path, json).with_context(|| format!("write out failed: {}", out_path))?;
        println!();
        println!("Wrote JSON: {}", out_path);
    }

    Ok(())
}
