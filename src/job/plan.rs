//! Deterministic unit planning.
//!
//! Units are never persisted: a run, and any later resumption, re-derives
//! them from the job's source material with [`plan_stage`]. Planning is a
//! pure function of the job's source, languages and recognized pages, so a
//! resumed run sees exactly the units the interrupted run saw.

use super::{Job, JobSource, Stage};
use crate::error::DocTransError;
use crate::segment::{detect_language, segment_pages, Language, PageText};
use std::path::PathBuf;

/// What a unit carries to its client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitPayload {
    /// A page image (or text file) to recognize.
    Page { page_number: usize, path: PathBuf },
    /// A sentence to translate.
    Text(String),
}

/// One discrete piece of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    pub ordinal: usize,
    pub payload: UnitPayload,
    /// Originating pages (recognition: the page itself).
    pub page_numbers: Vec<usize>,
}

/// Units of one stage plus the resolved source language.
#[derive(Debug, Clone)]
pub struct StagePlan {
    pub units: Vec<Unit>,
    /// Language code used in prompts; `auto` is already resolved.
    pub source_language: Option<String>,
    pub target_language: Option<String>,
}

/// Derive the units of the job's current stage.
pub fn plan_stage(job: &Job) -> Result<StagePlan, DocTransError> {
    match job.stage {
        Stage::Recognition => plan_recognition(job),
        Stage::Translation => plan_translation(job),
    }
}

fn plan_recognition(job: &Job) -> Result<StagePlan, DocTransError> {
    let JobSource::Images { pages } = &job.source else {
        return Err(DocTransError::InvalidConfig(format!(
            "job {} has a recognition stage but no page images",
            job.id
        )));
    };

    let units = pages
        .iter()
        .enumerate()
        .map(|(i, path)| Unit {
            ordinal: i,
            payload: UnitPayload::Page {
                page_number: i + 1,
                path: path.clone(),
            },
            page_numbers: vec![i + 1],
        })
        .collect();

    Ok(StagePlan {
        units,
        source_language: job.languages.as_ref().map(|l| l.source.clone()),
        target_language: job.languages.as_ref().map(|l| l.target.clone()),
    })
}

fn plan_translation(job: &Job) -> Result<StagePlan, DocTransError> {
    let languages = job.languages.as_ref().ok_or_else(|| {
        DocTransError::InvalidConfig(format!("job {} needs a language pair", job.id))
    })?;

    let pages: Vec<PageText> = match &job.source {
        JobSource::Text { text } => vec![PageText::new(1, text.clone())],
        JobSource::Pages { pages } => pages.clone(),
        JobSource::Images { .. } => job
            .recognized
            .iter()
            .map(|p| PageText::new(p.page_number, p.text.clone()))
            .collect(),
    };

    let (rules, source_code) = if languages.is_auto() {
        let all_text = pages
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let detected = detect_language(&all_text);
        (detected, detected.code().to_string())
    } else {
        (
            Language::from_code(&languages.source),
            languages.source.trim().to_string(),
        )
    };

    let units = segment_pages(&pages, rules)
        .into_iter()
        .enumerate()
        .map(|(i, seg)| Unit {
            ordinal: i,
            payload: UnitPayload::Text(seg.text),
            page_numbers: seg.page_numbers,
        })
        .collect();

    Ok(StagePlan {
        units,
        source_language: Some(source_code),
        target_language: Some(languages.target.trim().to_string()),
    })
}
