//! Re-basing for upstreams that quote against a fixed base.

use std::collections::BTreeMap;

use splitfx_common::Currency;

/// Symbols to request from a fixed-base upstream: the targets plus the
/// desired base, so its rate is available for division.
pub fn symbols_for(base: &Currency, targets: &[Currency]) -> Vec<Currency> {
    let mut symbols: Vec<Currency> = targets.to_vec();
    symbols.push(base.clone());
    symbols.sort();
    symbols.dedup();
    symbols
}

/// Convert rates quoted per one `native` unit into rates per one `desired`
/// unit, keeping only `targets`.
///
/// Returns `None` when the desired base is missing from the upstream
/// quote or is zero. The desired base itself always maps to exactly `1.0`.
pub fn rebase(
    native: &Currency,
    desired: &Currency,
    quoted: &BTreeMap<Currency, f64>,
    targets: &[Currency],
) -> Option<BTreeMap<Currency, f64>> {
    let divisor = if desired == native {
        1.0
    } else {
        *quoted.get(desired)?
    };
    if divisor == 0.0 || !divisor.is_finite() {
        return None;
    }

    let mut rates = BTreeMap::new();
    for target in targets {
        if target == desired {
            rates.insert(target.clone(), 1.0);
            continue;
        }
        let native_rate = if target == native {
            Some(1.0)
        } else {
            quoted.get(target).copied()
        };
        if let Some(rate) = native_rate {
            rates.insert(target.clone(), rate / divisor);
        }
    }
    Some(rates)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eur_quotes() -> BTreeMap<Currency, f64> {
        let mut quoted = BTreeMap::new();
        quoted.insert(Currency::usd(), 1.25);
        quoted.insert(Currency::gbp(), 0.85);
        quoted.insert(Currency::jpy(), 160.0);
        quoted
    }

    #[test]
    fn test_base_rate_is_exactly_one() {
        let rates = rebase(
            &Currency::eur(),
            &Currency::usd(),
            &eur_quotes(),
            &[Currency::usd(), Currency::gbp()],
        )
        .unwrap();

        assert_eq!(rates[&Currency::usd()], 1.0);
        assert!((rates[&Currency::gbp()] - 0.68).abs() < 1e-12);
    }

    #[test]
    fn test_native_base_as_target() {
        let rates = rebase(&Currency::eur(), &Currency::usd(), &eur_quotes(), &[Currency::eur()]).unwrap();
        assert!((rates[&Currency::eur()] - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_missing_base_quote() {
        let mut quoted = eur_quotes();
        quoted.remove(&Currency::usd());
        assert!(rebase(&Currency::eur(), &Currency::usd(), &quoted, &[Currency::gbp()]).is_none());
    }

    #[test]
    fn test_omitted_target_is_absent() {
        let rates = rebase(
            &Currency::eur(),
            &Currency::eur(),
            &eur_quotes(),
            &[Currency::gbp(), Currency::new("XAU")],
        )
        .unwrap();
        assert_eq!(rates.len(), 1);
        assert_eq!(rates[&Currency::gbp()], 0.85);
    }

    #[test]
    fn test_symbols_include_base_once() {
        let symbols = symbols_for(&Currency::usd(), &[Currency::gbp(), Currency::usd()]);
        assert_eq!(symbols, vec![Currency::gbp(), Currency::usd()]);
    }
}
