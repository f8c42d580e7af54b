//! Pipeline stages for document → page-image conversion.
//!
//! Each submodule implements one step and is independently testable. Stages
//! run strictly one after another: every page finishes a stage before any
//! page starts the next.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ normalize ──▶ extract ──▶ assemble
//! (path)   (pdftoppm)   (magick)     (layout +    (manifest)
//!                                     vision model)
//! ```
//!
//! 1. [`input`]      — classify the path as PDF, image, or folder of images
//! 2. [`render`]     — rasterise page ranges in parallel, or copy image inputs;
//!    [`dimensions`] supplies pixel sizes without spawning where possible
//! 3. [`normalize`]  — one cleanup invocation per page
//! 4. [`extract`]    — optional; [`layout`] chops each page into regions,
//!    [`llm`] turns text regions into Markdown via [`encode`]d crops
//! 5. [`assemble`]   — merge pages and per-stage errors into the manifest

pub mod assemble;
pub mod dimensions;
pub mod encode;
pub mod extract;
pub mod input;
pub mod layout;
pub mod llm;
pub mod normalize;
pub mod render;
