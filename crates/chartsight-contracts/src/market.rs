use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use indexmap::IndexMap;

/// Tabular context handed to the prompt builder: the latest row of the
/// market table plus series metadata. Commodity ordering follows the CSV
/// column order.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketContext {
    pub latest_date: String,
    pub commodities: IndexMap<String, f64>,
    pub data_points: u64,
    pub date_range: (String, String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarketRow {
    pub date: String,
    pub prices: Vec<f64>,
}

/// Parsed market table: commodity display names plus rows in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarketTable {
    pub commodities: Vec<String>,
    pub rows: Vec<MarketRow>,
}

impl MarketTable {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommodityStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

/// CSV-backed market data with modification-time reload caching.
///
/// Expected header: `date,<name>_price,...` — e.g.
/// `date,gold_price,silver_price,oil_price`.
#[derive(Debug)]
pub struct CsvStore {
    path: PathBuf,
    cache: Mutex<Option<(SystemTime, MarketTable)>>,
}

impl CsvStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the table, reusing the cached parse while the file's mtime is
    /// unchanged. Missing or unreadable files yield `None`.
    pub fn load(&self) -> Option<MarketTable> {
        let modified = fs::metadata(&self.path).and_then(|meta| meta.modified()).ok();
        let Some(modified) = modified else {
            if let Ok(mut cache) = self.cache.lock() {
                *cache = None;
            }
            return None;
        };

        if let Ok(cache) = self.cache.lock() {
            if let Some((cached_at, table)) = cache.as_ref() {
                if *cached_at == modified {
                    return Some(table.clone());
                }
            }
        }

        let raw = fs::read_to_string(&self.path).ok()?;
        let table = parse_table(&raw)?;
        if let Ok(mut cache) = self.cache.lock() {
            *cache = Some((modified, table.clone()));
        }
        Some(table)
    }

    /// Context for prompt construction, or `None` when no data is loaded.
    pub fn context(&self) -> Option<MarketContext> {
        let table = self.load()?;
        let last = table.rows.last()?;
        let first = table.rows.first()?;

        let mut commodities = IndexMap::new();
        for (index, name) in table.commodities.iter().enumerate() {
            if let Some(price) = last.prices.get(index) {
                commodities.insert(name.clone(), *price);
            }
        }

        Some(MarketContext {
            latest_date: last.date.clone(),
            commodities,
            data_points: table.rows.len() as u64,
            date_range: (first.date.clone(), last.date.clone()),
        })
    }

    pub fn latest_values(&self) -> Option<(String, IndexMap<String, f64>)> {
        let context = self.context()?;
        Some((context.latest_date, context.commodities))
    }

    /// Min/max/mean per commodity over the whole series.
    pub fn statistics(&self) -> IndexMap<String, CommodityStats> {
        let mut stats = IndexMap::new();
        let Some(table) = self.load() else {
            return stats;
        };
        for (index, name) in table.commodities.iter().enumerate() {
            let series: Vec<f64> = table
                .rows
                .iter()
                .filter_map(|row| row.prices.get(index).copied())
                .collect();
            if series.is_empty() {
                continue;
            }
            let min = series.iter().copied().fold(f64::INFINITY, f64::min);
            let max = series.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let mean = series.iter().sum::<f64>() / series.len() as f64;
            stats.insert(name.clone(), CommodityStats { min, max, mean });
        }
        stats
    }
}

fn parse_table(raw: &str) -> Option<MarketTable> {
    let mut lines = raw.lines();
    let header = lines.next()?.trim();
    let mut columns = header.split(',').map(str::trim);
    if columns.next()? != "date" {
        return None;
    }
    let commodities: Vec<String> = columns.map(display_name).collect();
    if commodities.is_empty() {
        return None;
    }

    let mut rows = Vec::new();
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split(',').map(str::trim);
        let Some(date) = fields.next().filter(|value| !value.is_empty()) else {
            continue;
        };
        let prices: Vec<f64> = fields.filter_map(|value| value.parse::<f64>().ok()).collect();
        if prices.len() != commodities.len() {
            continue;
        }
        rows.push(MarketRow {
            date: date.to_string(),
            prices,
        });
    }

    Some(MarketTable { commodities, rows })
}

/// `gold_price` -> `Gold`
fn display_name(column: &str) -> String {
    let base = column.strip_suffix("_price").unwrap_or(column);
    let mut chars = base.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
