use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use clap::{Parser, Subcommand, ValueEnum};
use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::fmt::format::FmtSpan;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use chrono::NaiveDate;

use comedor_processor_rs::{
    BatchOutput, BatchResult, Config, LayoutEngine, Processor,
    dataset::format_quantity,
    inference::{ExtractionMode, ProductKind},
    layout::{archive, pdf},
    proto,
    types::{GuideMode, PageFormat, TemperaturePolicy},
};

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    /// Output as JSON (default)
    Json,
    /// Output the normalized dataset as CSV
    Csv,
    /// Output as HTML visualization
    Html,
    /// Output as base64-encoded protobuf
    Protobuf,
}

#[derive(Debug, Clone, ValueEnum)]
enum Mode {
    /// One guide per route
    Route,
    /// One guide per delivery site
    Site,
}

#[derive(Debug, Clone, ValueEnum)]
enum Paper {
    A4Portrait,
    LetterLandscape,
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract delivery records from comedor reports and optionally build delivery guides
    Run {
        /// Input reports, processed in the given order
        #[arg(value_name = "FILE", required = true)]
        inputs: Vec<PathBuf>,

        /// Output format (json, csv, html, or protobuf)
        #[arg(long, value_enum, default_value = "json")]
        format: OutputFormat,

        /// Custom configuration file (TOML format)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Write delivery guide PDFs into this zip archive
        #[arg(long, value_name = "ZIP")]
        guides: Option<PathBuf>,

        /// Guide grouping
        #[arg(long, value_enum)]
        mode: Option<Mode>,

        /// Guide paper size
        #[arg(long, value_enum)]
        paper: Option<Paper>,

        /// Name printed under ELABORADO POR
        #[arg(long)]
        prepared_by: Option<String>,

        /// Name printed under APROBADO POR
        #[arg(long)]
        approved_by: Option<String>,

        /// Approval verdict printed in the guide header
        #[arg(long)]
        verdict: Option<String>,

        /// Seed for generated lots and temperatures
        #[arg(long)]
        seed: Option<u64>,

        /// Reuse one temperature per product across a route
        #[arg(long)]
        route_temperatures: bool,

        /// Fixed pork lot
        #[arg(long)]
        lot_pork: Option<String>,

        /// Fixed beef lot
        #[arg(long)]
        lot_beef: Option<String>,

        /// Fixed chicken thigh lot
        #[arg(long)]
        lot_thigh: Option<String>,

        /// Fixed chicken breast lot
        #[arg(long)]
        lot_breast: Option<String>,

        /// Fixed tilapia lot
        #[arg(long)]
        lot_tilapia: Option<String>,

        /// Stop each block at the first non-numeric row
        #[arg(long)]
        strict: bool,

        /// Threads used to render guides
        #[arg(long)]
        threads: Option<usize>,

        /// Enable detailed logging
        #[arg(long)]
        verbose: bool,
    },
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn generate_html(batch: &BatchResult, today: NaiveDate) -> String {
    let mut html = String::from(r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <title>Comedor Report Results</title>
    <style>
        * {
            font-family: monospace;
            font-size: 13px;
            line-height: 1.2;
            margin: 0;
            padding: 0;
            box-sizing: border-box;
            font-weight: normal;
            color: #000;
        }
        body {
            background: #fff;
            padding: 40px;
        }
        .container {
            max-width: 1400px;
            margin: 0 auto;
        }
        .section {
            margin: 20px 0;
        }
        hr {
            border: none;
            border-top: 1px solid #ddd;
            margin: 20px 0;
        }
        .metadata {
            display: grid;
            grid-template-columns: 200px 1fr;
            gap: 12px;
        }
        .error {
            color: #b00;
        }
        table {
            border-collapse: collapse;
            margin: 12px 0;
        }
        td, th {
            border: 1px solid #ddd;
            padding: 4px 8px;
            white-space: nowrap;
        }
        th {
            background: #f5f5f5;
        }
        h1, h2, h3 {
            margin: 0 0 16px 0;
        }
    </style>
</head>
<body>
    <div class="container">
        <h1>Comedor Report Results</h1>
"#);

    // Files
    html.push_str("<div class='section'>");
    html.push_str("<h2>Files</h2>");
    for outcome in &batch.outcomes {
        html.push_str("<div class='metadata'>");
        html.push_str(&format!("<div class='label'>File Path:</div><div class='value'>{}</div>", escape(&outcome.path)));
        html.push_str(&format!("<div class='label'>Dialect:</div><div class='value'>{}</div>", outcome.tag));
        html.push_str(&format!("<div class='label'>Records:</div><div class='value'>{}</div>", outcome.dataset.len()));
        if let Some(error) = &outcome.error {
            html.push_str(&format!("<div class='label'>Error:</div><div class='value error'>{}</div>", escape(error)));
        }
        if !outcome.diagnostics.is_empty() {
            html.push_str("<div class='label'>Diagnostics:</div><div class='value'>");
            for issue in &outcome.diagnostics {
                html.push_str(&format!("<div>{}</div>", escape(&issue.to_string())));
            }
            html.push_str("</div>");
        }
        if !outcome.steps.is_empty() {
            html.push_str("<div class='label'>Processing Steps:</div><div class='value'>");
            for step in &outcome.steps {
                html.push_str(&format!(
                    "<div>{} - {} ms ({})</div>",
                    step.name,
                    step.duration.as_millis(),
                    step.status
                ));
            }
            html.push_str("</div>");
        }
        html.push_str("</div><hr>");
    }
    html.push_str("</div>");

    // Validation
    let validation = batch.dataset.validate();
    html.push_str("<div class='section'>");
    html.push_str("<h2>Validation</h2>");
    for error in &validation.errors {
        html.push_str(&format!("<div class='error'>{}</div>", escape(&error.to_string())));
    }
    for warning in &validation.warnings {
        html.push_str(&format!("<div>{}</div>", escape(&warning.to_string())));
    }
    html.push_str("</div><hr>");

    // Routes
    let stats = batch.dataset.stats();
    if !stats.by_route.is_empty() {
        html.push_str("<div class='section'>");
        html.push_str("<h2>Routes</h2><table><tr><th>Route</th><th>Sites</th><th>Beneficiaries</th><th>Protein kg</th></tr>");
        for route in &stats.by_route {
            html.push_str(&format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                escape(&route.route),
                route.sites,
                route.beneficiaries,
                format_quantity(route.total_protein_kg)
            ));
        }
        html.push_str("</table></div><hr>");
    }

    // Records
    if !batch.dataset.is_empty() {
        html.push_str("<div class='section'>");
        html.push_str("<h2>Records</h2><table><tr>");
        for column in batch.dataset.column_names() {
            html.push_str(&format!("<th>{}</th>", column));
        }
        html.push_str("</tr>");
        for row in batch.dataset.rows(today) {
            html.push_str("<tr>");
            for value in row.values() {
                html.push_str(&format!("<td>{}</td>", escape(&value)));
            }
            html.push_str("</tr>");
        }
        html.push_str("</table></div>");
    }

    html.push_str("</div></body></html>");
    html
}

fn write_guides(batch: &BatchResult, config: &Config, today: NaiveDate, path: &Path) -> Result<()> {
    let mut engine = LayoutEngine::from_config(config.layout.clone(), today);
    let guides = engine.layout(&batch.dataset);
    if guides.is_empty() {
        warn!("no records, no guides written");
        return Ok(());
    }

    let rendered = pdf::render_all(&guides, config.layout.page_format, config.threads)?;
    let degraded = rendered.iter().filter(|g| g.degraded).count();
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = archive::write_archive(BufWriter::new(file), &rendered)?;
    writer.flush()?;
    info!(
        "{} guides written to {} ({} on the single-page layout)",
        rendered.len(),
        path.display(),
        degraded
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            inputs,
            format,
            config: config_path,
            guides,
            mode,
            paper,
            prepared_by,
            approved_by,
            verdict,
            seed,
            route_temperatures,
            lot_pork,
            lot_beef,
            lot_thigh,
            lot_breast,
            lot_tilapia,
            strict,
            threads,
            verbose,
        } => {
            // Setup logging based on verbose flag
            if verbose {
                tracing_subscriber::fmt()
                    .with_writer(std::io::stderr)
                    .with_span_events(FmtSpan::CLOSE)
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_thread_names(false)
                    .with_file(false)
                    .with_line_number(false)
                    .init();
            }

            // Load config
            let mut config = if let Some(path) = config_path {
                let content = std::fs::read_to_string(path)?;
                toml::from_str(&content)?
            } else {
                Config::default()
            };

            // Override config values
            if let Some(mode) = mode {
                config.layout.mode = match mode {
                    Mode::Route => GuideMode::Route,
                    Mode::Site => GuideMode::Site,
                };
            }
            if let Some(paper) = paper {
                config.layout.page_format = match paper {
                    Paper::A4Portrait => PageFormat::A4Portrait,
                    Paper::LetterLandscape => PageFormat::LetterLandscape,
                };
            }
            if let Some(name) = prepared_by {
                config.layout.prepared_by = name;
            }
            if let Some(name) = approved_by {
                config.layout.approved_by = name;
            }
            if let Some(verdict) = verdict {
                config.layout.verdict = verdict;
            }
            if seed.is_some() {
                config.layout.seed = seed;
            }
            if route_temperatures {
                config.layout.temperature_policy = TemperaturePolicy::PerRoute;
            }
            let lots = [
                (ProductKind::PorkMeat, lot_pork),
                (ProductKind::BeefMeat, lot_beef),
                (ProductKind::ChickenThighUnits, lot_thigh),
                (ProductKind::ChickenBreastWeight, lot_breast),
                (ProductKind::Tilapia, lot_tilapia),
            ];
            for (kind, lot) in lots {
                if let Some(lot) = lot {
                    config.layout.lots.insert(kind, lot);
                }
            }
            if strict {
                config.extraction.mode = ExtractionMode::Strict;
            }
            if let Some(t) = threads {
                config.threads = t;
            }

            let today = chrono::Local::now().date_naive();
            let processor = Processor::with_default_steps(config.clone());

            info!("Processing {} reports", inputs.len());
            let batch = processor.process_batch(&inputs).await;

            if let Some(path) = guides {
                write_guides(&batch, &config, today, &path)?;
            }

            // Generate output based on format
            let output_str = match format {
                OutputFormat::Json => {
                    let output = BatchOutput::new(&batch, today);
                    serde_json::to_string_pretty(&output)?
                }
                OutputFormat::Csv => {
                    let mut buf = Vec::new();
                    batch.dataset.write_csv(&mut buf, today)?;
                    String::from_utf8(buf)?
                }
                OutputFormat::Html => generate_html(&batch, today),
                OutputFormat::Protobuf => {
                    let message = proto::Batch::new(&batch, today);
                    let mut buf = Vec::new();
                    prost::Message::encode(&message, &mut buf)?;
                    BASE64.encode(buf)
                }
            };

            // Print to stdout without any extra formatting
            print!("{}", output_str);
        }
    }

    Ok(())
}
