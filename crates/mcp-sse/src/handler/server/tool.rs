use std::{borrow::Cow, collections::HashMap, future::Future, sync::Arc};

use futures::{FutureExt, future::BoxFuture};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;

use super::common::{parse_arguments, schema_for_type};
use crate::{
    model::{CallToolResult, ErrorData, JsonObject, Tool},
    service::RequestContext,
};

/// Everything a tool handler gets to see about one `tools/call`.
#[derive(Debug)]
pub struct ToolCallContext {
    pub name: Cow<'static, str>,
    pub arguments: Option<JsonObject>,
    pub request: RequestContext,
}

impl ToolCallContext {
    pub fn parse_arguments<T: DeserializeOwned>(&self) -> Result<T, ErrorData> {
        parse_arguments(self.arguments.as_ref())
    }
}

pub type DynCallToolHandler =
    dyn Fn(ToolCallContext) -> BoxFuture<'static, Result<CallToolResult, ErrorData>> + Send + Sync;

pub struct ToolRoute {
    pub attr: Tool,
    pub call: Arc<DynCallToolHandler>,
}

impl std::fmt::Debug for ToolRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRoute")
            .field("name", &self.attr.name)
            .field("description", &self.attr.description)
            .field("input_schema", &self.attr.input_schema)
            .finish()
    }
}

impl Clone for ToolRoute {
    fn clone(&self) -> Self {
        Self {
            attr: self.attr.clone(),
            call: self.call.clone(),
        }
    }
}

impl ToolRoute {
    pub fn new<C, Fut>(attr: Tool, call: C) -> Self
    where
        C: Fn(ToolCallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<CallToolResult, ErrorData>> + Send + 'static,
    {
        Self {
            attr,
            call: Arc::new(move |context| call(context).boxed()),
        }
    }

    /// A tool whose arguments deserialize into `A`. The input schema is
    /// generated from `A`, and arguments that do not match it are rejected
    /// with `invalid params` before `call` runs.
    pub fn typed<A, C, Fut>(
        name: impl Into<Cow<'static, str>>,
        description: impl Into<Cow<'static, str>>,
        call: C,
    ) -> Self
    where
        A: DeserializeOwned + JsonSchema + Send + 'static,
        C: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<CallToolResult, ErrorData>> + Send + 'static,
    {
        let attr = Tool::new(name, description, Arc::new(schema_for_type::<A>()));
        let call = Arc::new(call);
        Self::new(attr, move |context: ToolCallContext| {
            let call = call.clone();
            async move {
                let arguments: A = context.parse_arguments()?;
                call(arguments).await
            }
        })
    }

    pub fn name(&self) -> &str {
        &self.attr.name
    }
}

#[derive(Debug, Clone, Default)]
pub struct ToolRouter {
    map: HashMap<Cow<'static, str>, ToolRoute>,
}

impl ToolRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a route, replacing any tool with the same name.
    pub fn add_route(&mut self, route: ToolRoute) {
        self.map.insert(route.attr.name.clone(), route);
    }

    pub fn with_route(mut self, route: ToolRoute) -> Self {
        self.add_route(route);
        self
    }

    pub fn has_route(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub async fn call(&self, context: ToolCallContext) -> Result<CallToolResult, ErrorData> {
        let route = self
            .map
            .get(context.name.as_ref())
            .ok_or_else(|| {
                ErrorData::invalid_params(format!("tool not found: {}", context.name), None)
            })?;
        (route.call)(context).await
    }

    /// Tools sorted by name.
    pub fn list_all(&self) -> Vec<Tool> {
        let mut tools: Vec<Tool> = self.map.values().map(|route| route.attr.clone()).collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Content, ErrorCode};

    #[derive(serde::Deserialize, schemars::JsonSchema)]
    struct Echo {
        message: String,
    }

    fn router() -> ToolRouter {
        ToolRouter::new()
            .with_route(ToolRoute::typed("echo", "Echo a message", |Echo { message }| async move {
                Ok(CallToolResult::success(vec![Content::text(message)]))
            }))
            .with_route(ToolRoute::new(
                Tool::new("add", "Add two numbers", Tool::empty_input_schema()),
                |_context| async { Ok(CallToolResult::success(vec![Content::text("3")])) },
            ))
    }

    fn context(name: &'static str, arguments: serde_json::Value) -> ToolCallContext {
        let (peer, _sink) = crate::service::Peer::detached();
        ToolCallContext {
            name: name.into(),
            arguments: arguments.as_object().cloned(),
            request: RequestContext {
                id: 1.into(),
                ct: Default::default(),
                peer,
            },
        }
    }

    #[test]
    fn test_list_all_sorted() {
        let names: Vec<_> = router().list_all().into_iter().map(|tool| tool.name).collect();
        assert_eq!(names, ["add", "echo"]);
    }

    #[tokio::test]
    async fn test_call_typed_tool() {
        let result = router()
            .call(context("echo", serde_json::json!({"message": "hi"})))
            .await
            .unwrap();
        assert_eq!(result.text(), "hi");
    }

    #[tokio::test]
    async fn test_bad_arguments_and_unknown_tool() {
        let router = router();
        let err = router
            .call(context("echo", serde_json::json!({"msg": 1})))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::INVALID_PARAMS);

        let err = router
            .call(context("missing", serde_json::json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::INVALID_PARAMS);
    }
}
