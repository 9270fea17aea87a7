use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use doc_search::indexer::loader::{fingerprint, load_documents, scan_documents, SourceFile};
use doc_search::indexer::LoadReport;
use doc_search::library::DocumentLibrary;
use doc_search::rag::lifecycle::IndexController;
use doc_search::rag::{DocumentIndex, RagComponents};
use doc_search::Settings;

#[derive(Parser, Debug)]
#[command(name = "doc-index")]
#[command(about = "Build and query the document index offline")]
struct Args {
    /// Configuration file (defaults to ./doc-search.toml when present)
    #[arg(short, long, env = "DOC_SEARCH_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Rebuild the index from every document in the upload folder
    Rebuild,
    /// Copy files into the upload folder and append them to the index
    Add {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Run one search and print the summary
    Search {
        query: String,
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
    },
}

fn progress_bar(len: usize) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

/// Extract files one at a time so the progress bar tracks real work.
fn extract_with_progress(files: &[SourceFile], source: &str) -> Result<LoadReport> {
    let pb = progress_bar(files.len())?;
    let mut report = LoadReport::default();
    for file in files {
        pb.set_message(file.name.clone());
        let single = load_documents(std::slice::from_ref(file), source);
        report.files.extend(single.files);
        report.documents.extend(single.documents);
        report.failed.extend(single.failed);
        pb.inc(1);
    }
    pb.finish_with_message("done");
    Ok(report)
}

fn print_failures(report: &LoadReport) {
    if report.failed.is_empty() {
        return;
    }
    println!("\nFailed files:");
    for (name, err) in &report.failed {
        println!("  {}: {}", name, err);
    }
}

async fn full_build(
    index: &DocumentIndex,
    library: &DocumentLibrary,
    files: &[SourceFile],
    fp: &str,
) -> Result<()> {
    let report = extract_with_progress(files, "folder")?;
    let chunks = index.build_from_documents(&report.documents, fp).await?;

    println!("\nIndexing complete!");
    println!("  Files indexed: {}/{}", report.documents.len(), files.len());
    println!("  Files failed:  {}", report.failed.len());
    println!("  Total chunks:  {}", chunks);
    println!("  Folder:        {}", library.upload_dir().display());
    print_failures(&report);
    Ok(())
}

async fn rebuild(library: &DocumentLibrary, components: &RagComponents) -> Result<()> {
    let files = scan_documents(library.upload_dir(), library.allowed_extensions())?;
    println!("Found {} documents in {}", files.len(), library.upload_dir().display());

    let fp = fingerprint(&files, &components.fingerprint_params());
    let index = components.open_index().await?;
    full_build(&index, library, &files, &fp).await
}

async fn add(library: &DocumentLibrary, components: &RagComponents, paths: &[PathBuf]) -> Result<()> {
    library.ensure_dir()?;
    let params = components.fingerprint_params();
    let before = scan_documents(library.upload_dir(), library.allowed_extensions())?;
    let index = components.open_index().await?;
    let appendable = index.load_existing(&fingerprint(&before, &params)).await?;

    let mut saved = Vec::new();
    for path in paths {
        let original = file_name(path)?;
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let (stored, _) = library.save(&original, &data).await?;
        println!("  {} -> {}", path.display(), stored);
        saved.push(stored);
    }

    let after = scan_documents(library.upload_dir(), library.allowed_extensions())?;
    let fp = fingerprint(&after, &params);

    if appendable {
        let added: Vec<SourceFile> = after
            .iter()
            .filter(|f| saved.contains(&f.name))
            .cloned()
            .collect();
        let report = extract_with_progress(&added, "cli")?;
        match index.add_documents(&report.documents, &fp).await {
            Ok(chunks) => {
                println!("\nAppended {} chunks from {} files", chunks, report.documents.len());
                print_failures(&report);
                return Ok(());
            }
            Err(e) => tracing::warn!("Append failed, rebuilding instead: {:#}", e),
        }
    } else {
        println!("No matching persisted index, building from scratch");
    }

    let index = components.open_index().await?;
    full_build(&index, library, &after, &fp).await
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .with_context(|| format!("Not a file: {}", path.display()))
}

async fn search(
    library: Arc<DocumentLibrary>,
    components: RagComponents,
    settings: &Settings,
    query: &str,
    top_k: Option<usize>,
) -> Result<()> {
    let top_k = top_k
        .unwrap_or(settings.search.default_top_k)
        .clamp(1, settings.search.max_top_k);
    let controller = IndexController::new(library, components, settings.index.rebuild_timeout());
    let summary = controller.search(query, top_k).await?;
    println!("{}", summary);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("doc_search=warn")),
        )
        .init();

    let args = Args::parse();
    let settings = Settings::load(args.config.as_deref())?;
    let library = Arc::new(DocumentLibrary::new(
        settings.storage.upload_dir.clone(),
        settings.storage.allowed_extensions.clone(),
    ));

    println!("Initializing embedding model...");
    let components = RagComponents::from_settings(&settings)?;

    match args.command {
        Command::Rebuild => rebuild(&library, &components).await,
        Command::Add { files } => add(&library, &components, &files).await,
        Command::Search { query, top_k } => {
            search(library, components, &settings, &query, top_k).await
        }
    }
}
