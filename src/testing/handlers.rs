//! Action handlers
//!
//! Every action name maps to one [`ActionHandler`] in a [`HandlerRegistry`].
//! Handlers never return errors: a failing remote call fails the action
//! through [`ExecutionState::fail`] and the handler returns what it has.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::config::Action;
use super::context::{ExecutionState, RunContext};
use super::functions::resolve_value;
use crate::store::build_soql;

/// Answer of the cart resource when an item was added
const ADDED_TO_CART: &str = "Successfully added.";

/// One named operation a test step can invoke
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Run the action; `None` means there is nothing to assert against
    async fn run(&self, run: &RunContext, state: &mut ExecutionState, action: &Action) -> Option<Value>;
}

/// Action name -> handler
pub struct HandlerRegistry {
    handlers: HashMap<String, Box<dyn ActionHandler>>,
}

impl HandlerRegistry {
    /// Registry without any handler
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registry with every built-in handler
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("query", Query);
        registry.register("validateDataPackFields", ValidateDataPackFields);
        registry.register("createSObject", CreateSObject);
        registry.register("createCart", CreateCart);
        registry.register("getCartItems", GetCart::ITEMS);
        registry.register("getCartsProducts", GetCart::PRODUCTS);
        registry.register("deleteCartItems", DeleteCartItems);
        registry.register("addProduct", AddProduct);
        registry
    }

    pub fn register(&mut self, name: &str, handler: impl ActionHandler + 'static) {
        self.handlers.insert(name.to_string(), Box::new(handler));
    }

    pub fn get(&self, name: &str) -> Option<&dyn ActionHandler> {
        self.handlers.get(name).map(|h| h.as_ref())
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Replace `{{Field}}` placeholders with fields of the record
///
/// Unknown fields render as an empty string.
pub fn render_template(template: &str, record: &Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        let Some(len) = rest[start + 2..].find("}}") else {
            break;
        };
        out.push_str(&rest[..start]);

        let name = rest[start + 2..start + 2 + len].trim();
        let field = name
            .split('.')
            .try_fold(record, |value, part| value.get(part));
        if let Some(field) = field {
            out.push_str(&value_to_string(field));
        }

        rest = &rest[start + 2 + len + 2..];
    }

    out.push_str(rest);
    out
}

/// Render a scalar for messages and keys; `null` for missing values
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Run a query built from the `Query` template and the bound record
pub struct Query;

#[async_trait]
impl ActionHandler for Query {
    async fn run(&self, run: &RunContext, state: &mut ExecutionState, action: &Action) -> Option<Value> {
        let Some(template) = action.param_str("Query") else {
            state.fail(run, "query action without Query");
            return None;
        };

        let query = run.namespace.rewrite(&render_template(template, &state.record));
        match run.store.query(&query).await {
            Ok(result) => {
                let value = serde_json::to_value(result).unwrap_or(Value::Null);
                state.working_data.insert("query".to_string(), value.clone());
                Some(value)
            }
            Err(e) => {
                tracing::error!("Query Failed {}: {}", query, e);
                state.fail(run, e.remote_message());
                None
            }
        }
    }
}

/// Hand the bound record itself to the assertions
pub struct ValidateDataPackFields;

#[async_trait]
impl ActionHandler for ValidateDataPackFields {
    async fn run(&self, _run: &RunContext, state: &mut ExecutionState, _action: &Action) -> Option<Value> {
        Some(state.record.clone())
    }
}

/// Create a record of type `SObject` from its template
pub struct CreateSObject;

#[async_trait]
impl ActionHandler for CreateSObject {
    async fn run(&self, run: &RunContext, state: &mut ExecutionState, action: &Action) -> Option<Value> {
        let Some(sobject_type) = action.param_str("SObject") else {
            state.fail(run, "createSObject action without SObject");
            return None;
        };
        let record = create_record(run, state, action, sobject_type).await?;
        state
            .working_data
            .insert(format!("createSObject{}", sobject_type), record.clone());
        Some(record)
    }
}

/// Create the cart (an object of type `Type`) later cart actions work on
pub struct CreateCart;

#[async_trait]
impl ActionHandler for CreateCart {
    async fn run(&self, run: &RunContext, state: &mut ExecutionState, action: &Action) -> Option<Value> {
        let Some(sobject_type) = action.param_str("Type") else {
            state.fail(run, "createCart action without Type");
            return None;
        };
        let record = create_record(run, state, action, sobject_type).await?;
        state
            .working_data
            .insert(format!("createSObject{}", sobject_type), record.clone());
        state.working_data.insert("createCart".to_string(), record.clone());
        Some(record)
    }
}

/// Build the fields of a new record
///
/// Template fields are overridden by same-named action parameters, then
/// special values are resolved.
async fn build_record(
    run: &RunContext,
    state: &mut ExecutionState,
    action: &Action,
    template: &Map<String, Value>,
) -> Map<String, Value> {
    let mut fields = Map::with_capacity(template.len());
    for (key, default) in template {
        let raw = match action.parameters.get(key) {
            Some(value) if is_truthy(value) => value,
            _ => default,
        };
        let value = resolve_value(run, state, raw).await;
        fields.insert(key.clone(), value);
    }
    fields
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64() != Some(0.0),
        _ => true,
    }
}

/// Create, register for cleanup, and read back a record
async fn create_record(
    run: &RunContext,
    state: &mut ExecutionState,
    action: &Action,
    sobject_type: &str,
) -> Option<Value> {
    let sobject_type = run.namespace.rewrite(sobject_type);
    let sobject_type = sobject_type.as_str();
    let Some(template) = run.templates.get(sobject_type).cloned() else {
        state.fail(run, format!("No template for {}", sobject_type));
        tracing::error!("No template for {}", sobject_type);
        return None;
    };

    let fields = build_record(run, state, action, &template).await;
    if state.action_failed {
        return None;
    }

    let id = match run.store.create(sobject_type, &fields).await {
        Ok(id) => id,
        Err(e) => {
            tracing::error!("Create {} Failed: {}", sobject_type, e);
            state.fail(run, e.remote_message());
            return None;
        }
    };
    state.cleanup.push(sobject_type, &id);

    match run.store.retrieve(sobject_type, &id).await {
        Ok(record) => Some(record),
        Err(e) => {
            tracing::error!("Can Not Retrieve SObject {} {}: {}", sobject_type, id, e);
            state.fail(run, e.remote_message());
            None
        }
    }
}

/// Id of the cart created earlier in the test
fn cart_id(run: &RunContext, state: &mut ExecutionState) -> Option<String> {
    let id = state
        .working_field("createCart", "Id")
        .and_then(Value::as_str)
        .map(str::to_string);
    if id.is_none() {
        state.fail(run, "No cart created before cart action");
    }
    id
}

/// Fetch a sub-resource of the cart
pub struct GetCart {
    resource: &'static str,
    key: &'static str,
    label: &'static str,
}

impl GetCart {
    pub const ITEMS: GetCart = GetCart {
        resource: "items",
        key: "getCartItems",
        label: "Get Cart Items Failed",
    };

    pub const PRODUCTS: GetCart = GetCart {
        resource: "products",
        key: "getCartsProducts",
        label: "Get Cart Products Failed",
    };
}

#[async_trait]
impl ActionHandler for GetCart {
    async fn run(&self, run: &RunContext, state: &mut ExecutionState, _action: &Action) -> Option<Value> {
        let cart_id = cart_id(run, state)?;
        let path = format!("/carts/{}/{}", cart_id, self.resource);

        let result = match run.store.cart_get(&path).await {
            Ok(Value::Null) => {
                tracing::error!("{}: empty response", self.label);
                state.fail(run, format!("{}: empty response", self.label));
                None
            }
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!("{}: {}", self.label, e);
                state.fail(run, e.remote_message());
                None
            }
        };

        state
            .working_data
            .insert(self.key.to_string(), result.clone().unwrap_or(Value::Null));
        result
    }
}

/// Delete every item fetched by an earlier `getCartItems`
pub struct DeleteCartItems;

#[async_trait]
impl ActionHandler for DeleteCartItems {
    async fn run(&self, run: &RunContext, state: &mut ExecutionState, _action: &Action) -> Option<Value> {
        let cart_id = cart_id(run, state)?;

        let ids: Vec<String> = state
            .working_field("getCartItems", "records")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(cart_item_id).collect())
            .unwrap_or_default();

        if ids.is_empty() {
            state.fail(run, "No cart items to delete");
            return None;
        }

        let path = format!("/carts/{}/items?id={}", cart_id, ids.join(","));
        match run.store.cart_delete(&path).await {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!("Delete Cart Items Failed: {}", e);
                state.fail(run, e.remote_message());
                None
            }
        }
    }
}

/// Cart item ids come as `{"Id": {"value": ...}}`
fn cart_item_id(item: &Value) -> Option<String> {
    let id = item.get("Id")?;
    id.get("value")
        .unwrap_or(id)
        .as_str()
        .map(str::to_string)
}

/// Add the bound product to the cart through its price book entry
pub struct AddProduct;

impl AddProduct {
    async fn pricebook_entry(
        run: &RunContext,
        state: &mut ExecutionState,
        pricebook_id: &str,
    ) -> Option<String> {
        let product_key = state.data_pack_unique_key.clone();
        if let Some(entry) = run.cached_pricebook_entry(pricebook_id, &product_key) {
            return Some(entry);
        }

        let query = run.namespace.rewrite(&build_soql(
            "Id",
            "PricebookEntry",
            &format!(
                "Product2Id IN (SELECT Id FROM Product2 WHERE %vlocity_namespace%__GlobalKey__c = '{}') AND Pricebook2Id = '{}' LIMIT 1",
                product_key, pricebook_id
            ),
        ));

        let entry = match run.store.query(&query).await {
            Ok(result) if result.total_size > 0 => result.first_id().map(str::to_string),
            Ok(_) => None,
            Err(e) => {
                tracing::error!("PricebookEntry query failed: {}", e);
                None
            }
        };

        match entry {
            Some(entry) => {
                run.cache_pricebook_entry(pricebook_id, &product_key, &entry);
                Some(entry)
            }
            None => {
                tracing::error!("Not Found PricebookEntry {}", query);
                state.fail(run, "Pricebook Entry Not Found");
                None
            }
        }
    }
}

#[async_trait]
impl ActionHandler for AddProduct {
    async fn run(&self, run: &RunContext, state: &mut ExecutionState, _action: &Action) -> Option<Value> {
        let cart_id = cart_id(run, state)?;
        let Some(pricebook_id) = state
            .working_field("createCart", "Pricebook2Id")
            .and_then(Value::as_str)
            .map(str::to_string)
        else {
            state.fail(run, "Cart has no Pricebook2Id");
            return None;
        };

        let entry = Self::pricebook_entry(run, state, &pricebook_id).await?;
        let body = json!({"items": [{"itemId": entry}]});
        let path = format!("/carts/{}/items", cart_id);

        let result = match run.store.cart_post(&path, &body).await {
            Ok(value) => value,
            Err(e) => {
                tracing::error!("Add To Cart Failed {}: {}", body, e);
                state.fail(run, e.remote_message());
                return None;
            }
        };

        let message = result
            .get("messages")
            .and_then(|m| m.get(0))
            .and_then(|m| m.get("message"))
            .and_then(Value::as_str);
        if let Some(message) = message {
            if message != ADDED_TO_CART {
                tracing::error!("Add To Cart Failed: {}", message);
                state.fail(run, message.to_string());
            }
        }

        state.working_data.insert("addProduct".to_string(), result.clone());
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::QueryResult;
    use crate::testing::config::ObjectTemplates;
    use crate::testing::fake::{fake_run, fake_state, FakeStore};
    use std::sync::Arc;

    fn action(yaml: &str) -> Action {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn templates() -> ObjectTemplates {
        ObjectTemplates::parse(
            r#"
Account:
  Name: Test Account
Order:
  Name: Test Order
  AccountId: ACCOUNT()
  Pricebook2Id: PB1
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_render_template() {
        let record = json!({"Name": "Phone", "Nested": {"Code": 7}});
        assert_eq!(
            render_template("WHERE Name = '{{Name}}' AND C = {{ Nested.Code }}", &record),
            "WHERE Name = 'Phone' AND C = 7"
        );
        assert_eq!(render_template("{{Missing}}x", &record), "x");
        assert_eq!(render_template("open {{Name", &record), "open {{Name");
    }

    #[test]
    fn test_registry_lookup() {
        let registry = HandlerRegistry::builtin();
        assert!(registry.get("query").is_some());
        assert!(registry.get("addProduct").is_some());
        assert!(registry.get("Org").is_none());
        assert!(registry.get("Local").is_none());
        assert!(HandlerRegistry::empty().get("query").is_none());
    }

    #[tokio::test]
    async fn test_query_renders_record_fields() {
        let store = Arc::new(FakeStore::default());
        store.add_query(
            "ns__GlobalKey__c = 'phone-key'",
            QueryResult {
                total_size: 1,
                done: true,
                records: vec![json!({"Id": "01t1"})],
            },
        );
        let run = fake_run(store.clone());
        let mut state = fake_state();

        let result = Query
            .run(
                &run,
                &mut state,
                &action("Action: query\nQuery: \"SELECT Id FROM Product2 WHERE %vlocity_namespace%__GlobalKey__c = '{{%vlocity_namespace%__GlobalKey__c}}'\""),
            )
            .await
            .unwrap();

        assert_eq!(result["totalSize"], json!(1));
        assert!(!state.action_failed);
        assert!(state.working_value("query").is_some());
    }

    #[tokio::test]
    async fn test_query_failure_fails_action() {
        let store = Arc::new(FakeStore::default());
        store.fail_on("query:");
        let run = fake_run(store);
        let mut state = fake_state();

        let result = Query
            .run(&run, &mut state, &action("Action: query\nQuery: SELECT Id FROM X"))
            .await;

        assert!(result.is_none());
        assert!(state.action_failed);
        assert!(state.action_message.contains("refused"));
        assert!(run.error_happened());
    }

    #[tokio::test]
    async fn test_create_sobject_uses_template_and_overrides() {
        let store = Arc::new(FakeStore::default());
        let run = fake_run(store.clone()).with_templates(templates());
        let mut state = fake_state();

        let record = CreateSObject
            .run(&run, &mut state, &action("Action: createSObject\nSObject: Account\nName: Custom"))
            .await
            .unwrap();

        assert_eq!(record["Name"], json!("Custom"));
        let id = record["Id"].as_str().unwrap().to_string();
        assert_eq!(state.cleanup.ids("Account"), Some(&[id][..]));
        assert!(state.working_value("createSObjectAccount").is_some());
        assert_eq!(store.calls_starting_with("retrieve:").len(), 1);
    }

    #[tokio::test]
    async fn test_retrieve_failure_fails_action_but_keeps_cleanup() {
        let store = Arc::new(FakeStore::default());
        store.fail_on("retrieve:Account");
        let run = fake_run(store).with_templates(templates());
        let mut state = fake_state();

        let record = CreateSObject
            .run(&run, &mut state, &action("Action: createSObject\nSObject: Account"))
            .await;

        assert!(record.is_none());
        assert!(state.action_failed);
        assert!(run.error_happened());
        assert_eq!(state.cleanup.ids("Account").map(<[String]>::len), Some(1));
    }

    #[tokio::test]
    async fn test_create_failure_is_not_registered_for_cleanup() {
        let store = Arc::new(FakeStore::default());
        store.fail_on("create:Account");
        let run = fake_run(store).with_templates(templates());
        let mut state = fake_state();

        let record = CreateSObject
            .run(&run, &mut state, &action("Action: createSObject\nSObject: Account"))
            .await;

        assert!(record.is_none());
        assert!(state.action_failed);
        assert!(state.cleanup.is_empty());
    }

    #[tokio::test]
    async fn test_create_without_template_fails() {
        let run = fake_run(Arc::new(FakeStore::default()));
        let mut state = fake_state();

        CreateSObject
            .run(&run, &mut state, &action("Action: createSObject\nSObject: Unknown"))
            .await;

        assert!(state.action_failed);
        assert_eq!(state.action_message, "No template for Unknown");
    }

    async fn with_cart(store: &Arc<FakeStore>) -> (RunContext, ExecutionState) {
        let run = fake_run(store.clone()).with_templates(templates());
        let mut state = fake_state();
        CreateSObject
            .run(&run, &mut state, &action("Action: createSObject\nSObject: Account"))
            .await
            .unwrap();
        CreateCart
            .run(&run, &mut state, &action("Action: createCart\nType: Order"))
            .await
            .unwrap();
        (run, state)
    }

    #[tokio::test]
    async fn test_create_cart_resolves_account() {
        let store = Arc::new(FakeStore::default());
        let (_run, mut state) = with_cart(&store).await;

        let cart = state.working_value("createCart").unwrap();
        let account = state.working_field("createSObjectAccount", "Id").unwrap();
        assert_eq!(&cart["AccountId"], account);
        assert_eq!(state.cleanup.take().len(), 2);
    }

    #[tokio::test]
    async fn test_add_product_caches_pricebook_entry() {
        let store = Arc::new(FakeStore::default());
        store.add_query(
            "PricebookEntry",
            QueryResult {
                total_size: 1,
                done: true,
                records: vec![json!({"Id": "01u1"})],
            },
        );
        let (run, mut state) = with_cart(&store).await;
        let cart_id = state.working_field("createCart", "Id").unwrap().as_str().unwrap().to_string();
        store.add_cart(
            &format!("/carts/{}/items", cart_id),
            json!({"messages": [{"message": "Successfully added."}]}),
        );

        AddProduct.run(&run, &mut state, &Action::named("addProduct")).await.unwrap();
        assert!(!state.action_failed);
        AddProduct.run(&run, &mut state, &Action::named("addProduct")).await.unwrap();

        assert_eq!(store.calls_starting_with("query:").len(), 1);
        assert_eq!(run.cached_pricebook_entry("PB1", "phone-key").as_deref(), Some("01u1"));
        let posts = store.calls_starting_with("cart_post:");
        assert_eq!(posts.len(), 2);
        assert!(posts[0].contains("01u1"));
    }

    #[tokio::test]
    async fn test_add_product_rejected_by_cart() {
        let store = Arc::new(FakeStore::default());
        store.add_query(
            "PricebookEntry",
            QueryResult {
                total_size: 1,
                done: true,
                records: vec![json!({"Id": "01u1"})],
            },
        );
        let (run, mut state) = with_cart(&store).await;
        let cart_id = state.working_field("createCart", "Id").unwrap().as_str().unwrap().to_string();
        store.add_cart(
            &format!("/carts/{}/items", cart_id),
            json!({"messages": [{"message": "Product is not orderable"}]}),
        );

        AddProduct.run(&run, &mut state, &Action::named("addProduct")).await;
        assert!(state.action_failed);
        assert_eq!(state.action_message, "Product is not orderable");
    }

    #[tokio::test]
    async fn test_add_product_without_entry() {
        let store = Arc::new(FakeStore::default());
        let (run, mut state) = with_cart(&store).await;

        AddProduct.run(&run, &mut state, &Action::named("addProduct")).await;
        assert!(state.action_failed);
        assert_eq!(state.action_message, "Pricebook Entry Not Found");
        assert!(store.calls_starting_with("cart_post:").is_empty());
    }

    #[tokio::test]
    async fn test_get_and_delete_cart_items() {
        let store = Arc::new(FakeStore::default());
        let (run, mut state) = with_cart(&store).await;
        let cart_id = state.working_field("createCart", "Id").unwrap().as_str().unwrap().to_string();
        store.add_cart(
            &format!("/carts/{}/items", cart_id),
            json!({"totalSize": 2, "records": [{"Id": {"value": "i1"}}, {"Id": {"value": "i2"}}]}),
        );

        let items = GetCart::ITEMS
            .run(&run, &mut state, &Action::named("getCartItems"))
            .await
            .unwrap();
        assert_eq!(items["totalSize"], json!(2));

        DeleteCartItems
            .run(&run, &mut state, &Action::named("deleteCartItems"))
            .await
            .unwrap();
        assert_eq!(
            store.calls_starting_with("cart_delete:"),
            vec![format!("cart_delete:/carts/{}/items?id=i1,i2", cart_id)]
        );
    }

    #[tokio::test]
    async fn test_cart_action_without_cart() {
        let run = fake_run(Arc::new(FakeStore::default()));
        let mut state = fake_state();

        let result = GetCart::PRODUCTS
            .run(&run, &mut state, &Action::named("getCartsProducts"))
            .await;
        assert!(result.is_none());
        assert!(state.action_failed);
    }

    #[tokio::test]
    async fn test_get_cart_products_error() {
        let store = Arc::new(FakeStore::default());
        let (run, mut state) = with_cart(&store).await;
        store.fail_on("cart_get:");

        let result = GetCart::PRODUCTS
            .run(&run, &mut state, &Action::named("getCartsProducts"))
            .await;
        assert!(result.is_none());
        assert!(state.action_failed);
        assert!(state.action_message.contains("refused"));
        assert_eq!(state.working_value("getCartsProducts"), Some(&Value::Null));
    }
}
