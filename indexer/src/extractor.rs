//! Extraction of token transfers from Rholang deployment terms.
//!
//! The chain does not expose transfers as first-class events; they are
//! encoded in contract source. This module recognizes the handful of
//! shapes the wallet and system contracts emit and resolves variable
//! bindings declared earlier in the same term. It is a pure function of
//! its inputs and never touches the store.

use asi_common::chain::TransferStatus;
use asi_common::config::MAX_ADDRESS_LEN;
use asi_common::utils::is_asi_address;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;

lazy_static! {
    // canonical block-level transfer: match ("from", "to", amount)
    static ref RE_DIRECT_TRANSFER: Regex =
        Regex::new(r#"match \("(1111[^"]+)", "(1111[^"]+)", (\d+)\)"#).unwrap();
    // @vault!("transfer", <"literal" | variable>, amount,
    static ref RE_VAULT_TRANSFER: Regex = Regex::new(
        r#"@vault!\s*\(\s*"transfer"\s*,\s*(?:"([0-9a-zA-Z]{53,56})"|(\w+))\s*,\s*(\d+)\s*,"#
    )
    .unwrap();
    // spaced variant of the literal triple
    static ref RE_MATCH_TRIPLE: Regex = Regex::new(
        r#"match\s*\(\s*"([0-9a-zA-Z]{53,56})"\s*,\s*"([0-9a-zA-Z]{53,56})"\s*,\s*(\d+)\s*\)"#
    )
    .unwrap();
    // ASIVault!("findOrCreate", "address", amount)
    static ref RE_FIND_OR_CREATE: Regex = Regex::new(
        r#"ASIVault!\s*\(\s*"findOrCreate"\s*,\s*"([0-9a-zA-Z]{53,56})"\s*,\s*(\d+)\s*\)"#
    )
    .unwrap();
    // match "address" { name =>
    static ref RE_BIND_SINGLE: Regex =
        Regex::new(r#"match\s*"([0-9a-zA-Z]{53,56})"\s*\{\s*(\w+)\s*=>"#).unwrap();
    // name = "address"
    static ref RE_BIND_ASSIGN: Regex =
        Regex::new(r#"(\w+)\s*=\s*"([0-9a-zA-Z]{53,56})""#).unwrap();
    // match ("from", "to", amount) { (nameFrom, nameTo, nameAmt) =>
    static ref RE_BIND_TRIPLE: Regex = Regex::new(
        r#"match\s*\(\s*"([0-9a-zA-Z]{53,56})"\s*,\s*"([0-9a-zA-Z]{53,56})"\s*,\s*\d+\s*\)\s*\{\s*\((\w+)\s*,\s*(\w+)\s*,\s*\w+\)\s*=>"#
    )
    .unwrap();
}

/// A transfer recognized inside a single deployment term. Block number
/// and deploy id are attached by the block processor at insert time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedTransfer {
    pub from_address: String,
    pub to_address: String,
    pub amount_dust: i64,
    pub status: TransferStatus,
}

/// Scan `term` for transfers. Patterns are tried in order and the first
/// one yielding at least one valid record wins, so the cleanest literal
/// form cannot be double-counted by a looser one.
pub fn extract_transfers(term: &str, deployer: &str, errored: bool) -> Vec<ExtractedTransfer> {
    if term.is_empty() {
        return Vec::new();
    }

    let status = if errored {
        TransferStatus::Failed
    } else {
        TransferStatus::Success
    };

    let direct = extract_direct(term, status);
    if !direct.is_empty() {
        return direct;
    }

    // everything below needs some vault vocabulary in the term
    if !term.contains("ASIVault") && !term.contains("transfer") && !term.to_lowercase().contains("vault")
    {
        return Vec::new();
    }

    let bindings = collect_bindings(term);

    let vault = extract_vault_transfers(term, deployer, &bindings, status);
    if !vault.is_empty() {
        return vault;
    }

    let triple = extract_match_triples(term, deployer, &bindings, status);
    if !triple.is_empty() {
        return triple;
    }

    extract_find_or_create(term, deployer, status)
}

/// Variable-to-address bindings declared in the term.
fn collect_bindings(term: &str) -> HashMap<String, String> {
    let mut bindings = HashMap::new();

    for caps in RE_BIND_SINGLE.captures_iter(term) {
        if is_asi_address(&caps[1]) {
            bindings.insert(caps[2].to_string(), caps[1].to_string());
        }
    }
    for caps in RE_BIND_ASSIGN.captures_iter(term) {
        if is_asi_address(&caps[2]) {
            bindings.insert(caps[1].to_string(), caps[2].to_string());
        }
    }
    for caps in RE_BIND_TRIPLE.captures_iter(term) {
        if is_asi_address(&caps[1]) && is_asi_address(&caps[2]) {
            bindings.insert(caps[3].to_string(), caps[1].to_string());
            bindings.insert(caps[4].to_string(), caps[2].to_string());
        }
    }

    bindings
}

fn extract_direct(term: &str, status: TransferStatus) -> Vec<ExtractedTransfer> {
    let mut transfers = Vec::new();
    for caps in RE_DIRECT_TRANSFER.captures_iter(term) {
        let from = &caps[1];
        let to = &caps[2];
        if !is_asi_address(from) || !is_asi_address(to) {
            continue;
        }
        push_transfer(&mut transfers, from, to, &caps[3], status);
    }
    transfers
}

fn extract_vault_transfers(
    term: &str,
    deployer: &str,
    bindings: &HashMap<String, String>,
    status: TransferStatus,
) -> Vec<ExtractedTransfer> {
    let mut transfers = Vec::new();
    for caps in RE_VAULT_TRANSFER.captures_iter(term) {
        // recipient is either a literal address or a bound variable
        let to = match caps.get(1) {
            Some(literal) if is_asi_address(literal.as_str()) => literal.as_str().to_string(),
            Some(_) => continue,
            None => {
                let variable = &caps[2];
                match bindings.get(variable) {
                    Some(address) => address.clone(),
                    // unbound variable, drop the record
                    None => continue,
                }
            }
        };
        push_transfer(&mut transfers, deployer, &to, &caps[3], status);
    }
    transfers
}

fn extract_match_triples(
    term: &str,
    deployer: &str,
    bindings: &HashMap<String, String>,
    status: TransferStatus,
) -> Vec<ExtractedTransfer> {
    let mut transfers = Vec::new();
    for caps in RE_MATCH_TRIPLE.captures_iter(term) {
        let from = resolve_from(&caps[1], deployer, bindings);
        let Some(to) = resolve_to(&caps[2], bindings) else {
            continue;
        };
        push_transfer(&mut transfers, &from, &to, &caps[3], status);
    }
    transfers
}

fn extract_find_or_create(
    term: &str,
    deployer: &str,
    status: TransferStatus,
) -> Vec<ExtractedTransfer> {
    let mut transfers = Vec::new();
    for caps in RE_FIND_OR_CREATE.captures_iter(term) {
        if !is_asi_address(&caps[1]) {
            continue;
        }
        push_transfer(&mut transfers, deployer, &caps[1], &caps[2], status);
    }
    transfers
}

/// Resolve a sender capture: binding, then literal, then the deployer.
fn resolve_from(capture: &str, deployer: &str, bindings: &HashMap<String, String>) -> String {
    if let Some(address) = bindings.get(capture) {
        address.clone()
    } else if is_asi_address(capture) {
        capture.to_string()
    } else {
        deployer.to_string()
    }
}

/// Resolve a recipient capture: binding, then literal, else drop.
fn resolve_to(capture: &str, bindings: &HashMap<String, String>) -> Option<String> {
    if let Some(address) = bindings.get(capture) {
        Some(address.clone())
    } else if is_asi_address(capture) {
        Some(capture.to_string())
    } else {
        None
    }
}

fn push_transfer(
    transfers: &mut Vec<ExtractedTransfer>,
    from: &str,
    to: &str,
    amount: &str,
    status: TransferStatus,
) {
    if from.is_empty() || to.is_empty() {
        return;
    }
    if from.len() > MAX_ADDRESS_LEN || to.len() > MAX_ADDRESS_LEN {
        debug!(
            "Skipping transfer with oversized address: from {} chars, to {} chars",
            from.len(),
            to.len()
        );
        return;
    }
    let Ok(amount_dust) = amount.parse::<i64>() else {
        warn!("Skipping transfer with unparseable amount '{}'", amount);
        return;
    };
    if amount_dust <= 0 {
        return;
    }

    transfers.push(ExtractedTransfer {
        from_address: from.to_string(),
        to_address: to.to_string(),
        amount_dust,
        status,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use asi_common::config::COIN_VALUE;
    use asi_common::utils::format_token;

    // 4 + 50 = 54 characters, inside the 53..=56 window
    fn addr(tag: char) -> String {
        format!("1111{}", tag.to_string().repeat(50))
    }

    fn deployer() -> String {
        "04deadbeef".to_string()
    }

    #[test]
    fn test_direct_transfer() {
        let term = format!(r#"match ("{}", "{}", 500000000)"#, addr('a'), addr('b'));
        let transfers = extract_transfers(&term, &deployer(), false);

        assert_eq!(transfers.len(), 1);
        let t = &transfers[0];
        assert_eq!(t.from_address, addr('a'));
        assert_eq!(t.to_address, addr('b'));
        assert_eq!(t.amount_dust, 500_000_000);
        assert_eq!(t.status, TransferStatus::Success);
        assert_eq!(format_token(t.amount_dust as u64), "5.00000000");
    }

    #[test]
    fn test_errored_deployment_yields_failed_transfer() {
        let term = format!(r#"match ("{}", "{}", 42)"#, addr('a'), addr('b'));
        let transfers = extract_transfers(&term, &deployer(), true);
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].amount_dust, 42);
        assert_eq!(transfers[0].status, TransferStatus::Failed);
    }

    #[test]
    fn test_direct_wins_over_vault_pattern() {
        // both shapes in one term must yield exactly one transfer
        let term = format!(
            r#"match ("{src}", "{dst}", 100000000) {{ (fromV, toV, amt) =>
                @vault!("transfer", toV, 100000000, *resultCh)
            }}"#,
            src = addr('s'),
            dst = addr('d'),
        );
        let transfers = extract_transfers(&term, &deployer(), false);
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].from_address, addr('s'));
        assert_eq!(transfers[0].to_address, addr('d'));
    }

    #[test]
    fn test_vault_variable_resolved_through_binding() {
        // without the direct triple the vault pattern must resolve toV
        let term = format!(
            r#"match ("{src}", "{dst}", 99) {{ (fromV, toV, amt) => Nil }}
               @vault!("transfer", toV, 100000000, *resultCh)"#,
            src = addr('s'),
            dst = addr('d'),
        );
        // break the direct pattern by using the spaced form only
        let term = term.replacen("match (", "match  (", 1);
        let transfers = extract_transfers(&term, &deployer(), false);
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].from_address, deployer());
        assert_eq!(transfers[0].to_address, addr('d'));
        assert_eq!(transfers[0].amount_dust, 100_000_000);
    }

    #[test]
    fn test_vault_literal_recipient() {
        let term = format!(
            r#"@vault!("transfer", "{dst}", 250, *ret)"#,
            dst = addr('d')
        );
        let transfers = extract_transfers(&term, &deployer(), false);
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].from_address, deployer());
        assert_eq!(transfers[0].to_address, addr('d'));
        assert_eq!(transfers[0].amount_dust, 250);
    }

    #[test]
    fn test_unbound_variable_is_dropped() {
        let term = r#"@vault!("transfer", mysteryVar, 100, *ret)"#;
        assert!(extract_transfers(term, &deployer(), false).is_empty());
    }

    #[test]
    fn test_binding_by_assignment() {
        let term = format!(
            r#"recipient = "{dst}"
               @vault!("transfer", recipient, 777, *ret)"#,
            dst = addr('r')
        );
        let transfers = extract_transfers(&term, &deployer(), false);
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].to_address, addr('r'));
    }

    #[test]
    fn test_binding_by_single_match() {
        let term = format!(
            r#"match "{dst}" {{ target =>
                 @vault!("transfer", target, 888, *ret)
               }}"#,
            dst = addr('m')
        );
        let transfers = extract_transfers(&term, &deployer(), false);
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].to_address, addr('m'));
    }

    #[test]
    fn test_find_or_create() {
        let term = format!(
            r#"ASIVault!("findOrCreate", "{dst}", 1000000000)"#,
            dst = addr('v')
        );
        let transfers = extract_transfers(&term, &deployer(), false);
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].from_address, deployer());
        assert_eq!(transfers[0].to_address, addr('v'));
        assert_eq!(transfers[0].amount_dust, 1_000_000_000);
    }

    #[test]
    fn test_zero_amount_is_dropped() {
        let term = format!(r#"match ("{}", "{}", 0)"#, addr('a'), addr('b'));
        assert!(extract_transfers(&term, &deployer(), false).is_empty());
    }

    #[test]
    fn test_incidental_vault_mention_yields_nothing() {
        let term = "contract @\"myVault\"(x) = { Nil } // a vault themed contract";
        assert!(extract_transfers(term, &deployer(), false).is_empty());
    }

    #[test]
    fn test_invalid_address_length_is_dropped() {
        // 60 characters breaks the 53..=56 window
        let long = format!("1111{}", "x".repeat(56));
        let term = format!(r#"match ("{}", "{}", 5)"#, long, addr('b'));
        assert!(extract_transfers(&term, &deployer(), false).is_empty());
    }

    #[test]
    fn test_empty_term() {
        assert!(extract_transfers("", &deployer(), false).is_empty());
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let term = format!(
            r#"match ("{}", "{}", {})"#,
            addr('a'),
            addr('b'),
            3 * COIN_VALUE
        );
        let first = extract_transfers(&term, &deployer(), false);
        let second = extract_transfers(&term, &deployer(), false);
        assert_eq!(first, second);
    }
}
