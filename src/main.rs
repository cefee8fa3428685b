use clap::{Arg, Command};
use log::LevelFilter;
use phishguard::classifier::Artifacts;
use phishguard::features::FeatureExtractor;
use phishguard::metrics::{evaluate, top_importances};
use phishguard::predictor::{score_features, Predictor};
use phishguard::Config;
use std::path::Path;
use std::process;

#[tokio::main]
async fn main() {
    let matches = Command::new("phishguard")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Phishing URL triage: feature extraction, classification, explainability")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("phishguard.yaml"),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Generate a default configuration file")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("url")
                .short('u')
                .long("url")
                .value_name("URL")
                .help("Classify a single URL")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("fetch-content")
                .long("fetch-content")
                .help("Fetch the page (through the safe-fetch guard) for content features")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .help("Emit results as JSON")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("extract-batch")
                .long("extract-batch")
                .value_name("FILE")
                .help("Extract training features from a url,label CSV")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("FILE")
                .help("Output file for batch extraction (default: stdout)")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("evaluate")
                .long("evaluate")
                .value_name("FILE")
                .help("Evaluate the trained model against a url,label CSV")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let log_level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if let Some(path) = matches.get_one::<String>("generate-config") {
        match Config::generate_default(path) {
            Ok(()) => {
                println!("Default configuration written to {path}");
                return;
            }
            Err(e) => {
                eprintln!("Error generating configuration: {e}");
                process::exit(1);
            }
        }
    }

    let config_path = matches.get_one::<String>("config").unwrap();
    let config = match Config::load_or_default(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            process::exit(1);
        }
    };

    let as_json = matches.get_flag("json");
    let fetch_content = matches.get_flag("fetch-content");

    if let Some(url) = matches.get_one::<String>("url") {
        classify_url(&config, url, fetch_content, as_json).await;
        return;
    }

    if let Some(input) = matches.get_one::<String>("extract-batch") {
        let output = matches.get_one::<String>("output").map(String::as_str);
        extract_batch(&config, input, output, fetch_content).await;
        return;
    }

    if let Some(input) = matches.get_one::<String>("evaluate") {
        evaluate_file(&config, input, as_json).await;
        return;
    }

    eprintln!("Nothing to do. Try --url, --extract-batch, --evaluate, or --help.");
    process::exit(2);
}

async fn classify_url(config: &Config, url: &str, fetch_content: bool, as_json: bool) {
    let predictor = match Predictor::new(config) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error initializing predictor: {e}");
            process::exit(1);
        }
    };

    let result = predictor.predict(url, fetch_content).await;

    if as_json {
        match serde_json::to_string_pretty(&result) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("Error serializing result: {e}");
                process::exit(1);
            }
        }
        if result.error.is_some() {
            process::exit(1);
        }
        return;
    }

    println!("URL: {}", result.url);
    if let Some(error) = &result.error {
        eprintln!("Error: {error}");
        process::exit(1);
    }
    println!(
        "Classification: {}",
        result.classification.as_deref().unwrap_or("unknown")
    );
    if let Some(risk) = result.risk_score {
        println!("Risk score: {risk}/100");
    }
    if !result.top_contributing_features.is_empty() {
        println!("Top contributing features:");
        for c in &result.top_contributing_features {
            println!("  {} = {:.4}", c.name, c.contribution);
        }
    }
}

async fn extract_batch(config: &Config, input: &str, output: Option<&str>, fetch_content: bool) {
    let (urls, labels) = match read_url_csv(input) {
        Ok(rows) => rows,
        Err(e) => {
            eprintln!("Error reading {input}: {e}");
            process::exit(1);
        }
    };

    let extractor = match FeatureExtractor::new(config) {
        Ok(e) => e,
        Err(e) => {
            eprintln!("Error initializing extractor: {e}");
            process::exit(1);
        }
    };

    log::info!("extracting features for {} URLs", urls.len());
    let rows = extractor
        .extract_batch(&urls, labels.as_deref(), fetch_content)
        .await;

    let mut csv = String::new();
    let mut header: Vec<String> = extractor.feature_names().to_vec();
    let with_labels = labels.is_some();
    if with_labels {
        header.push("label".to_string());
    }
    csv.push_str(&header.join(","));
    csv.push('\n');
    for row in &rows {
        let mut cells: Vec<String> = row.features.values().iter().map(|v| v.to_string()).collect();
        if with_labels {
            cells.push(row.label.map(|l| l.to_string()).unwrap_or_default());
        }
        csv.push_str(&cells.join(","));
        csv.push('\n');
    }

    match output {
        Some(path) => {
            if let Err(e) = std::fs::write(path, csv) {
                eprintln!("Error writing {path}: {e}");
                process::exit(1);
            }
            println!("Wrote {} rows to {path}", rows.len());
        }
        None => print!("{csv}"),
    }
}

async fn evaluate_file(config: &Config, input: &str, as_json: bool) {
    let (urls, labels) = match read_url_csv(input) {
        Ok(rows) => rows,
        Err(e) => {
            eprintln!("Error reading {input}: {e}");
            process::exit(1);
        }
    };
    let Some(labels) = labels else {
        eprintln!("Evaluation requires a label column (1 = phishing, 0 = legitimate)");
        process::exit(1);
    };

    let artifacts = match Artifacts::load(Path::new(&config.model_dir)) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("Error loading model artifacts: {e}");
            process::exit(1);
        }
    };
    let extractor = match FeatureExtractor::new(config) {
        Ok(e) => e,
        Err(e) => {
            eprintln!("Error initializing extractor: {e}");
            process::exit(1);
        }
    };

    let rows = extractor.extract_batch(&urls, Some(&labels), false).await;
    let mut y_pred = Vec::with_capacity(rows.len());
    for row in &rows {
        match score_features(
            &row.features,
            &artifacts.feature_names,
            artifacts.model.as_ref(),
            artifacts.scaler.as_ref(),
        ) {
            Ok((label, _, _)) => y_pred.push(u8::from(label == "Phishing")),
            Err(e) => {
                eprintln!("Error scoring {}: {e}", row.url);
                process::exit(1);
            }
        }
    }

    let report = evaluate(&labels, &y_pred);

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report).unwrap_or_default());
        return;
    }

    println!("Evaluated {} URLs", rows.len());
    println!("Accuracy:  {:.4}", report.accuracy);
    println!("Precision: {:.4}", report.precision);
    println!("Recall:    {:.4}", report.recall);
    println!("F1:        {:.4}", report.f1);
    println!("Confusion matrix (rows=true, cols=pred):");
    println!("  legitimate: {:?}", report.confusion_matrix[0]);
    println!("  phishing:   {:?}", report.confusion_matrix[1]);

    let top = top_importances(artifacts.model.as_ref(), &artifacts.feature_names, 15);
    if !top.is_empty() {
        println!("Top global feature importances:");
        for (name, importance) in top {
            println!("  {name} = {importance:.4}");
        }
    }
}

/// Minimal url,label CSV reader. Accepts an optional header row, a bare
/// url-per-line file, or url,label rows; anything fancier belongs to the
/// dataset tooling that produces these files.
fn read_url_csv(path: &str) -> Result<(Vec<String>, Option<Vec<u8>>), std::io::Error> {
    let content = std::fs::read_to_string(path)?;
    let mut urls = Vec::new();
    let mut labels: Vec<u8> = Vec::new();
    let mut saw_label = false;

    for (i, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if i == 0 {
            let lower = line.to_lowercase();
            if lower.starts_with("url") && (lower == "url" || lower.starts_with("url,")) {
                continue;
            }
        }
        match line.rsplit_once(',') {
            Some((url, label)) if matches!(label.trim(), "0" | "1") => {
                urls.push(url.trim().to_string());
                labels.push(if label.trim() == "1" { 1 } else { 0 });
                saw_label = true;
            }
            _ => {
                urls.push(line.to_string());
                labels.push(0);
            }
        }
    }

    if saw_label {
        Ok((urls, Some(labels)))
    } else {
        Ok((urls, None))
    }
}
