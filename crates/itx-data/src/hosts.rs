//! Block-number → endpoint routing over configured host ranges.

use eyre::{eyre, Context, Result};
use std::str::FromStr;

use crate::types::HostRange;

/// Returns the endpoint of the first range admitting `block_number`.
///
/// Ranges are checked in declaration order. `None` means the block is not
/// routable and no request must be built for it.
pub fn route(hosts: &[HostRange], block_number: u64) -> Option<&str> {
    hosts
        .iter()
        .find(|range| range.admits(block_number))
        .map(|range| range.url.as_str())
}

/// Pairs of range indices (into `hosts`) that admit at least one common block.
pub fn overlapping(hosts: &[HostRange]) -> Vec<(usize, usize)> {
    let mut pairs = Vec::new();
    for (i, a) in hosts.iter().enumerate() {
        for (j, b) in hosts.iter().enumerate().skip(i + 1) {
            if ranges_intersect(a, b) {
                pairs.push((i, j));
            }
        }
    }
    pairs
}

fn ranges_intersect(a: &HostRange, b: &HostRange) -> bool {
    // [la, ua) ∩ [lb, ub) is non-empty iff max(la, lb) < min(ua, ub)
    let start = a.lower.unwrap_or(0).max(b.lower.unwrap_or(0));
    match (a.upper, b.upper) {
        (Some(ua), Some(ub)) => start < ua.min(ub),
        (Some(u), None) | (None, Some(u)) => start < u,
        (None, None) => true,
    }
}

/// Whether the range admits no block at all.
pub fn is_empty(range: &HostRange) -> bool {
    match (range.lower, range.upper) {
        (Some(lower), Some(upper)) => lower >= upper,
        (None, Some(0)) => true,
        _ => false,
    }
}

/// Parses `<lower>..<upper>=<url>`; either bound may be left empty.
///
/// ```
/// # use itx_data::HostRange;
/// let range: HostRange = "..4370000=http://localhost:8545".parse().unwrap();
/// assert_eq!(range.lower, None);
/// assert_eq!(range.upper, Some(4_370_000));
/// ```
impl FromStr for HostRange {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self> {
        let (bounds, url) = s
            .split_once('=')
            .ok_or_else(|| eyre!("host range '{s}' must look like <lower>..<upper>=<url>"))?;
        let (lower, upper) = bounds
            .split_once("..")
            .ok_or_else(|| eyre!("host range bounds '{bounds}' must look like <lower>..<upper>"))?;
        let url = url.trim();
        if url.is_empty() {
            return Err(eyre!("host range '{s}' has an empty URL"));
        }

        Ok(HostRange::new(
            parse_bound(lower).wrap_err_with(|| format!("invalid lower bound in '{s}'"))?,
            parse_bound(upper).wrap_err_with(|| format!("invalid upper bound in '{s}'"))?,
            url,
        ))
    }
}

fn parse_bound(bound: &str) -> Result<Option<u64>> {
    let bound = bound.trim().replace('_', "");
    if bound.is_empty() {
        return Ok(None);
    }
    Ok(Some(bound.parse::<u64>()?))
}
