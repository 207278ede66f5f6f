// src/services/extractor.rs

//! Position table extraction.
//!
//! The [`Extractor`] contract is all-or-nothing: either every row becomes a
//! well-formed [`PositionRecord`] or the call fails. An empty list is only
//! returned when the page positively reports that no positions are open.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};

use crate::error::{AppError, Result};
use crate::models::{ExtractorConfig, PositionRecord, TableSelectors, Target};
use crate::utils::normalize_whitespace;

/// Number of table columns a position row must have.
const POSITION_COLUMNS: usize = 7;

/// Fetches the current positions of one target.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Fetch and parse the target's positions within `timeout`.
    async fn fetch(&self, target: &Target, timeout: Duration) -> Result<Vec<PositionRecord>>;

    /// Release any reusable session. Called once at shutdown.
    async fn release(&self) -> Result<()> {
        Ok(())
    }
}

/// Compiled table selectors.
#[derive(Debug, Clone)]
struct ParsedSelectors {
    row: Selector,
    cell: Selector,
    token_cell: Selector,
    token_name: Selector,
    leverage: Selector,
}

impl ParsedSelectors {
    fn parse(selectors: &TableSelectors) -> Result<Self> {
        Ok(Self {
            row: parse_selector(&selectors.row_selector)?,
            cell: parse_selector(&selectors.cell_selector)?,
            token_cell: parse_selector(&selectors.token_cell_selector)?,
            token_name: parse_selector(&selectors.token_name_selector)?,
            leverage: parse_selector(&selectors.leverage_selector)?,
        })
    }
}

/// Extractor reusing one long-lived HTTP session across polls.
pub struct SessionExtractor {
    user_agent: String,
    selectors: ParsedSelectors,
    empty_marker: Option<String>,
    session: Mutex<Option<Client>>,
}

impl SessionExtractor {
    /// Create a session extractor; invalid selectors are a configuration error.
    pub fn new(config: &ExtractorConfig) -> Result<Self> {
        let selectors = ParsedSelectors::parse(&config.selectors)?;
        Ok(Self {
            user_agent: config.user_agent.clone(),
            selectors,
            empty_marker: config
                .selectors
                .empty_marker
                .as_ref()
                .map(|m| normalize_whitespace(m))
                .filter(|m| !m.is_empty()),
            session: Mutex::new(None),
        })
    }

    /// Current session, opened on first use.
    fn session(&self) -> Result<Client> {
        let mut guard = self
            .session
            .lock()
            .map_err(|_| AppError::extraction("session", "session lock poisoned"))?;
        if let Some(client) = guard.as_ref() {
            return Ok(client.clone());
        }

        let client = Client::builder().user_agent(&self.user_agent).build()?;
        log::debug!("Opened extraction session");
        *guard = Some(client.clone());
        Ok(client)
    }

    /// Parse the positions table out of a rendered page.
    pub fn parse_table(&self, target: &str, html: &str) -> Result<Vec<PositionRecord>> {
        let document = Html::parse_document(html);
        let rows: Vec<ElementRef> = document.select(&self.selectors.row).collect();

        if rows.is_empty() {
            if self.has_empty_marker(&document) {
                return Ok(Vec::new());
            }
            return Err(AppError::extraction(
                target,
                "no position rows and no empty-state marker",
            ));
        }

        rows.iter()
            .enumerate()
            .map(|(index, row)| {
                self.parse_row(row).ok_or_else(|| {
                    AppError::extraction(target, format!("row {} is malformed", index + 1))
                })
            })
            .collect()
    }

    fn has_empty_marker(&self, document: &Html) -> bool {
        let Some(marker) = &self.empty_marker else {
            return false;
        };
        let text = element_text(document.root_element());
        text.contains(marker.as_str())
    }

    fn parse_row(&self, row: &ElementRef) -> Option<PositionRecord> {
        let cells: Vec<ElementRef> = row.select(&self.selectors.cell).collect();
        if cells.len() < POSITION_COLUMNS {
            return None;
        }

        let token = row
            .select(&self.selectors.token_cell)
            .next()
            .and_then(|cell| {
                let name = cell.select(&self.selectors.token_name).next().map(element_text)?;
                let leverage = cell
                    .select(&self.selectors.leverage)
                    .next()
                    .map(element_text)
                    .unwrap_or_default();
                Some(normalize_whitespace(&format!("{} {}", name, leverage)))
            })
            .unwrap_or_else(|| element_text(cells[0]));

        let record = PositionRecord {
            token,
            size: element_text(cells[1]),
            net_value: element_text(cells[2]),
            collateral: element_text(cells[3]),
            entry_price: element_text(cells[4]),
            mark_price: element_text(cells[5]),
            liquidation_price: element_text(cells[6]),
        };

        record.is_well_formed().then_some(record)
    }
}

#[async_trait]
impl Extractor for SessionExtractor {
    async fn fetch(&self, target: &Target, timeout: Duration) -> Result<Vec<PositionRecord>> {
        let client = self.session()?;
        let response = client
            .get(&target.url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::ExtractionTimeout {
                        target: target.url.clone(),
                        timeout_ms: timeout.as_millis() as u64,
                    }
                } else {
                    AppError::extraction(&target.url, e)
                }
            })?
            .error_for_status()
            .map_err(|e| AppError::extraction(&target.url, e))?;
        let html = response
            .text()
            .await
            .map_err(|e| AppError::extraction(&target.url, e))?;

        self.parse_table(&target.url, &html)
    }

    async fn release(&self) -> Result<()> {
        let mut guard = self
            .session
            .lock()
            .map_err(|_| AppError::extraction("session", "session lock poisoned"))?;
        if guard.take().is_some() {
            log::info!("Extraction session released");
        }
        Ok(())
    }
}

/// Visible text of an element with whitespace collapsed.
fn element_text(element: ElementRef) -> String {
    normalize_whitespace(&element.text().collect::<Vec<_>>().join(" "))
}

fn parse_selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| AppError::selector(s, format!("{e:?}")))
}
