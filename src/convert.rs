//! Run entry point: input → pages on disk → manifest.
//!
//! ## Why stage barriers?
//!
//! Each stage finishes every page before the next begins. Rendering is
//! chunked across the whole document, so a page cannot start normalising
//! while its chunk neighbours are still being produced; and keeping the
//! barrier for the later stages means each one sees a complete, stable
//! input set, which keeps per-stage error accounting exact.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::output::{write_manifest, Manifest};
use crate::pipeline::assemble::assemble_manifest;
use crate::pipeline::extract::{extract_pages, ExtractOutcome};
use crate::pipeline::input::{resolve_input, InputKind};
use crate::pipeline::llm::{LlmTextGenerator, TextGenerator};
use crate::pipeline::normalize::{normalize_pages, place_raw_pages};
use crate::pipeline::render::{ingest_images, render_pdf};
use edgequake_llm::{LLMProvider, ProviderFactory};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Model used when a provider is named without one.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// Process `input` (a PDF, an image, or a folder of images) into `out_dir`.
///
/// # Returns
/// `Ok(Manifest)` whenever the run reaches the output stage, even if some
/// or all pages failed (check `manifest.errors`). The manifest has also been
/// written to `out_dir/manifest.json`.
///
/// # Errors
/// Returns `Err(PipelineError)` only for fatal errors:
/// - input missing, unreadable, or of an unsupported kind
/// - PDF metadata unreadable (page count unknown)
/// - text extraction requested but no generator could be resolved
/// - output directory or manifest not writable
pub async fn run(
    input: impl AsRef<Path>,
    out_dir: impl AsRef<Path>,
    config: &PipelineConfig,
) -> Result<Manifest, PipelineError> {
    let total_start = Instant::now();
    let input = input.as_ref();
    let out_dir = out_dir.as_ref();
    info!("Starting run: {} → {}", input.display(), out_dir.display());

    // ── Step 1: Resolve input ────────────────────────────────────────────
    let kind = resolve_input(input)?;

    // ── Step 2: Resolve the generator before any work is done ────────────
    let generator = if config.extract_text {
        Some(resolve_generator(config)?)
    } else {
        None
    };

    // ── Step 3: Output and scratch directories ───────────────────────────
    tokio::fs::create_dir_all(out_dir)
        .await
        .map_err(|e| PipelineError::OutputWriteFailed {
            path: out_dir.to_path_buf(),
            source: e,
        })?;
    let scratch = tempfile::Builder::new()
        .prefix(".raw-")
        .tempdir_in(out_dir)
        .map_err(|e| PipelineError::OutputWriteFailed {
            path: out_dir.to_path_buf(),
            source: e,
        })?;

    // ── Step 4: Render / ingest ──────────────────────────────────────────
    let rendered = match &kind {
        InputKind::Pdf(pdf) => render_pdf(pdf, scratch.path(), config).await?,
        InputKind::Image(_) | InputKind::Folder { .. } => {
            ingest_images(&kind.images(), scratch.path(), config).await
        }
    };

    // ── Step 5: Normalise ────────────────────────────────────────────────
    let normalized = if config.normalize {
        normalize_pages(&rendered.pages, out_dir, config).await
    } else {
        place_raw_pages(&rendered.pages, out_dir, config).await
    };

    // ── Step 6: Extract (optional) ───────────────────────────────────────
    let extracted = match generator {
        Some(generator) => {
            extract_pages(
                &normalized.pages,
                out_dir,
                scratch.path(),
                generator.as_ref(),
                config,
            )
            .await
        }
        None => ExtractOutcome {
            pages: normalized.pages,
            errors: Vec::new(),
        },
    };

    // ── Step 7: Assemble and write the manifest ──────────────────────────
    let manifest = assemble_manifest(
        kind.source_name(),
        config,
        rendered.toolchain,
        extracted.pages,
        vec![rendered.errors, normalized.errors, extracted.errors],
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_run_complete(manifest.pages.len(), manifest.errors.len());
    }
    write_manifest(&manifest, out_dir).await?;

    if let Err(e) = scratch.close() {
        warn!("Could not remove scratch directory: {}", e);
    }

    info!(
        "Run complete: {}/{} pages, {} errors, {}ms",
        manifest.pages.len(),
        manifest.page_count,
        manifest.errors.len(),
        total_start.elapsed().as_millis()
    );
    Ok(manifest)
}

/// Synchronous wrapper around [`run`] that creates its own Tokio runtime.
///
/// Do not call from inside an existing runtime.
pub fn run_sync(
    input: impl AsRef<Path>,
    out_dir: impl AsRef<Path>,
    config: &PipelineConfig,
) -> Result<Manifest, PipelineError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| PipelineError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(run(input, out_dir, config))
}

// ── Generator resolution ─────────────────────────────────────────────────

/// Resolve the text generator, from most-specific to least-specific.
///
/// 1. **Injected generator** (`config.text_generator`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`); the API key is
///    read from the provider's usual environment variable.
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`),
///    honoured even when several API keys are present.
/// 4. **`OPENAI_API_KEY`** present: OpenAI with `config.model` or the default.
/// 5. **Full auto-detection** (`ProviderFactory::from_env`).
pub fn resolve_generator(config: &PipelineConfig) -> Result<Arc<dyn TextGenerator>, PipelineError> {
    if let Some(ref generator) = config.text_generator {
        return Ok(Arc::clone(generator));
    }
    let provider = resolve_provider(config)?;
    Ok(Arc::new(LlmTextGenerator::new(provider, config)))
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, PipelineError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        PipelineError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

fn resolve_provider(config: &PipelineConfig) -> Result<Arc<dyn LLMProvider>, PipelineError> {
    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| PipelineError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
