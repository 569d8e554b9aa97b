//! Decoding of `[publication|index|frequency]` references embedded in pricing formulas.

use crate::PriceIndex;

/// Decodes the bracketed price reference in `raw`, if any.
///
/// The match is the leftmost `[` followed, on the same line, by three non-empty
/// pipe-separated parts and a closing `]`. Each part extends as far right as it
/// can, so a line holding two bracket groups matches both of them at once and
/// then fails the three-segment check. Callers decode one formula slot at a time.
pub fn decode_formula(raw: &str) -> Option<PriceIndex> {
    let matched = find_bracketed_triple(raw)?;
    let inner: String = matched.chars().filter(|c| *c != '[' && *c != ']').collect();

    let mut segments = inner.split('|');
    match (segments.next(), segments.next(), segments.next(), segments.next()) {
        (Some(publication), Some(index), Some(frequency), None) => {
            Some(PriceIndex::new(publication, index, frequency))
        }
        _ => None,
    }
}

fn find_bracketed_triple(raw: &str) -> Option<&str> {
    for (start, _) in raw.match_indices('[') {
        let line_end = raw[start..]
            .find('\n')
            .map_or(raw.len(), |offset| start + offset);
        let line = &raw.as_bytes()[start..line_end];

        let pipes: Vec<usize> = positions(line, b'|');
        let closes: Vec<usize> = positions(line, b']');

        for &first in pipes.iter().rev().filter(|&&p| p >= 2) {
            for &second in pipes.iter().rev().take_while(|&&p| p >= first + 2) {
                if let Some(&end) = closes.iter().rev().find(|&&c| c >= second + 2) {
                    return Some(&raw[start..=start + end]);
                }
            }
        }
    }
    None
}

fn positions(line: &[u8], needle: u8) -> Vec<usize> {
    line.iter()
        .enumerate()
        .filter(|(_, b)| **b == needle)
        .map(|(i, _)| i)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_reference_surrounded_by_arithmetic() {
        let index = decode_formula("(10.5*[GD|HOU SHP CHNL|DAILY]) + 3.55").expect("index");
        assert_eq!(index, PriceIndex::new("GD", "HOU SHP CHNL", "DAILY"));
    }

    #[test]
    fn decodes_bare_reference() {
        let index = decode_formula("[PJM DA LMP|40523629|HOURLY]").expect("index");
        assert_eq!(index.publication, "PJM DA LMP");
        assert_eq!(index.index, "40523629");
        assert_eq!(index.frequency, "HOURLY");
    }

    #[test]
    fn wrong_segment_counts_are_absent() {
        assert_eq!(decode_formula("[GD|HOU SHP CHNL]"), None);
        assert_eq!(decode_formula("[GD|HOU|DAILY|EXTRA]"), None);
        assert_eq!(decode_formula("[|HOU|DAILY]"), None);
    }

    #[test]
    fn text_without_brackets_is_absent() {
        assert_eq!(decode_formula(""), None);
        assert_eq!(decode_formula("FIXED 42.00"), None);
        assert_eq!(decode_formula("GD|HOU|DAILY"), None);
    }

    #[test]
    fn two_groups_on_one_line_do_not_decode() {
        assert_eq!(decode_formula("[GD|HOU|DAILY] - [ICE|PEN|MONTHLY]"), None);
    }

    #[test]
    fn reference_must_sit_on_one_line() {
        assert_eq!(decode_formula("[GD|HOU\n|DAILY]"), None);
        let index = decode_formula("1.0\n[NGI|CHI|DAILY]\n+ 2").expect("index");
        assert_eq!(index, PriceIndex::new("NGI", "CHI", "DAILY"));
    }

    #[test]
    fn match_starts_at_leftmost_bracket() {
        let index = decode_formula("[adj] 0.9*[PLATTS|MIDC|DAILY]").expect("index");
        assert_eq!(index, PriceIndex::new("adj 0.9*PLATTS", "MIDC", "DAILY"));
    }
}
