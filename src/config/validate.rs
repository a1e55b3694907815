use std::fmt;

use super::env::EnvVars;
use super::types::ExchangeConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    ApiKey,
    ApiSecret,
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialKind::ApiKey => f.write_str("API key"),
            CredentialKind::ApiSecret => f.write_str("API secret"),
        }
    }
}

/// A credential that was absent or empty for an enabled exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialIssue {
    pub exchange: String,
    pub kind: CredentialKind,
    pub env_var: String,
}

impl fmt::Display for CredentialIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} not set for {} ({}); disabling",
            self.kind, self.exchange, self.env_var
        )
    }
}

/// Disable every enabled exchange whose key or secret is missing.
///
/// Takes the raw candidates and returns the corrected set together with one
/// issue per missing credential. Exchanges that are already disabled are
/// left alone and produce no issues. Order is preserved.
pub fn validate_exchanges(
    candidates: Vec<ExchangeConfig>,
    env: &EnvVars,
) -> (Vec<ExchangeConfig>, Vec<CredentialIssue>) {
    let mut issues = Vec::new();

    let validated = candidates
        .into_iter()
        .map(|mut exchange| {
            if !exchange.enabled {
                return exchange;
            }

            let checks = [
                (CredentialKind::ApiKey, &exchange.api_key_env),
                (CredentialKind::ApiSecret, &exchange.api_secret_env),
            ];
            let missing: Vec<CredentialIssue> = checks
                .into_iter()
                .filter(|(_, var)| !env.is_set(var))
                .map(|(kind, var)| CredentialIssue {
                    exchange: exchange.name.clone(),
                    kind,
                    env_var: var.clone(),
                })
                .collect();

            if !missing.is_empty() {
                exchange.enabled = false;
                issues.extend(missing);
            }
            exchange
        })
        .collect();

    (validated, issues)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::ExchangeType;

    fn candidate(name: &str) -> ExchangeConfig {
        let upper = name.to_uppercase();
        ExchangeConfig::new(
            name,
            ExchangeType::Crypto,
            format!("{upper}_API_KEY"),
            format!("{upper}_API_SECRET"),
        )
    }

    #[test]
    fn test_complete_credentials_stay_enabled() {
        let env: EnvVars = [("BINANCE_API_KEY", "abc"), ("BINANCE_API_SECRET", "xyz")]
            .into_iter()
            .collect();

        let (exchanges, issues) = validate_exchanges(vec![candidate("binance")], &env);

        assert!(exchanges[0].enabled);
        assert!(issues.is_empty());
    }

    #[test]
    fn test_missing_secret_disables() {
        let env: EnvVars = [("COINBASE_API_KEY", "abc")].into_iter().collect();

        let (exchanges, issues) = validate_exchanges(vec![candidate("coinbase")], &env);

        assert!(!exchanges[0].enabled);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, CredentialKind::ApiSecret);
        assert_eq!(issues[0].env_var, "COINBASE_API_SECRET");
    }

    #[test]
    fn test_empty_value_counts_as_missing() {
        let env: EnvVars = [("ALPACA_API_KEY", ""), ("ALPACA_API_SECRET", "s")]
            .into_iter()
            .collect();

        let (exchanges, issues) = validate_exchanges(vec![candidate("alpaca")], &env);

        assert!(!exchanges[0].enabled);
        assert_eq!(issues[0].kind, CredentialKind::ApiKey);
    }

    #[test]
    fn test_both_missing_reports_both() {
        let (exchanges, issues) =
            validate_exchanges(vec![candidate("binance")], &EnvVars::default());

        assert!(!exchanges[0].enabled);
        assert_eq!(issues.len(), 2);
        assert_eq!(
            issues[0].to_string(),
            "API key not set for binance (BINANCE_API_KEY); disabling"
        );
    }

    #[test]
    fn test_disabled_exchange_is_not_rechecked() {
        let mut disabled = candidate("kraken");
        disabled.enabled = false;

        let (exchanges, issues) = validate_exchanges(vec![disabled], &EnvVars::default());

        assert!(!exchanges[0].enabled);
        assert!(issues.is_empty());
    }

    #[test]
    fn test_order_preserved() {
        let names = ["binance", "coinbase", "alpaca"];
        let candidates = names.iter().map(|n| candidate(n)).collect();

        let (exchanges, _) = validate_exchanges(candidates, &EnvVars::default());

        let out: Vec<_> = exchanges.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(out, names);
    }
}
