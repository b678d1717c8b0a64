//! Special values in object templates
//!
//! A template value may name a function instead of a literal. Each function
//! is resolved at most once per test instance; later references reuse the
//! first successful result.

use chrono::{SecondsFormat, Utc};
use serde_json::Value;

use super::context::{ExecutionState, RunContext};
use crate::store::build_soql;

/// Functions usable as template values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialValue {
    /// Current date and time
    Today,
    /// Id of the Account created earlier in the test
    Account,
    /// Id of the run's default price list
    PriceList,
}

impl SpecialValue {
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "TODAY()" => Some(Self::Today),
            "ACCOUNT()" => Some(Self::Account),
            "PRICELIST()" => Some(Self::PriceList),
            _ => None,
        }
    }
}

/// Resolve a template value, evaluating it if it names a function
///
/// Failures are reported on the test and resolve to `null`.
pub async fn resolve_value(run: &RunContext, state: &mut ExecutionState, value: &Value) -> Value {
    let Some(special) = value.as_str().and_then(SpecialValue::parse) else {
        return value.clone();
    };

    if let Some(cached) = state.substitutions.get(&special) {
        return cached.clone();
    }

    let resolved = match special {
        SpecialValue::Today => Some(Value::String(
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        )),
        SpecialValue::Account => account_id(run, state),
        SpecialValue::PriceList => price_list_id(run, state).await,
    };

    match resolved {
        Some(value) => {
            state.substitutions.insert(special, value.clone());
            value
        }
        None => Value::Null,
    }
}

fn account_id(run: &RunContext, state: &mut ExecutionState) -> Option<Value> {
    let id = state.working_field("createSObjectAccount", "Id").cloned();
    if id.is_none() {
        state.fail(run, "ACCOUNT() used before an Account was created");
        tracing::error!("No Account created before ACCOUNT() in test {}", state.test_name);
    }
    id
}

async fn price_list_id(run: &RunContext, state: &mut ExecutionState) -> Option<Value> {
    let Some(code) = run.default_price_list.as_deref() else {
        state.fail(run, "Default PriceList Missing");
        tracing::error!("Default PriceList Missing for test {}", state.test_name);
        return None;
    };

    let query = run.namespace.rewrite(&build_soql(
        "Id,%vlocity_namespace%__Code__c",
        "%vlocity_namespace%__PriceList__c",
        &format!("%vlocity_namespace%__Code__c = '{}'", code),
    ));

    let id = match run.store.query(&query).await {
        Ok(result) => result.first_id().map(|id| Value::String(id.to_string())),
        Err(e) => {
            tracing::error!("Price list query failed: {}", e);
            None
        }
    };

    if id.is_none() {
        state.fail(run, format!("Price List Not Found: {}", code));
        tracing::error!("Not Found Price List {}", code);
    }
    id
}
