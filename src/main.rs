use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

mod catalog;
mod cli;
mod config;
mod llm;
mod recommend;
mod semantic;
mod service;
mod storage;
#[cfg(test)]
mod tests;
mod web;

use catalog::Catalog;
use config::Config;
use recommend::RecommendationResponse;
use semantic::{EmbeddingModel, EmbeddingProvider, VectorStorage};
use service::ServiceContext;

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let args = cli::Args::parse();

    let base_path = config::resolve_base_path(args.data_dir)?;
    let config = Config::load_with(&base_path)?;

    match args.command {
        cli::Command::Serve {} => web::start_daemon(Arc::new(ServiceContext::new(config))),

        cli::Command::Recommend { text, json } => {
            let service = ServiceContext::new(config);
            service.init_from_config()?;

            let synthesis = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?
                .block_on(service.synthesize(&text))?;

            if let Some(reason) = &synthesis.degraded {
                eprintln!("note: ranked by similarity only ({reason})");
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&synthesis.response)?);
            } else {
                print_recommendations(&synthesis.response);
            }
            Ok(())
        }

        cli::Command::Index { rebuild } => {
            if rebuild {
                VectorStorage::new(config.vectors_path()).delete()?;
            }

            let catalog = Catalog::load_csv(&config.catalog_path())?;
            let embedder = EmbeddingModel::new(
                &config.embedding.model,
                config.base_path().to_path_buf(),
                Some(config.download_timeout()),
            )?;

            let service = ServiceContext::new(config);
            let index = service.load_or_build_index(&catalog, &embedder)?;

            println!(
                "{} documents indexed with {} ({} dimensions), {} rows dropped",
                index.len(),
                embedder.name(),
                index.dimensions(),
                catalog.dropped()
            );
            println!("vectors: {}", service.config().vectors_path().display());
            Ok(())
        }
    }
}

fn print_recommendations(response: &RecommendationResponse) {
    if response.is_empty() {
        println!("No matching assessments found.");
        return;
    }

    for (idx, rec) in response.recommendations.iter().enumerate() {
        let duration = rec
            .duration
            .map(|d| format!("{d} min"))
            .unwrap_or_else(|| "N/A".to_string());
        let test_type = if rec.test_type.is_empty() {
            "N/A"
        } else {
            rec.test_type.as_str()
        };

        println!("{}. {} (score {:.2})", idx + 1, rec.assessment_name, rec.relevance_score);
        println!("   url: {}", rec.url);
        println!(
            "   duration: {duration} | remote testing: {} | adaptive: {} | test type: {test_type}",
            rec.remote_testing.as_str(),
            rec.adaptive_support.as_str()
        );
        println!("   why: {}", rec.relevance_explanation);
        println!();
    }
}
