//! Prompt templates.
//!
//! A prompt declares its arguments up front; the router rejects a
//! `prompts/get` that omits a required argument before the handler runs.
use std::{collections::HashMap, future::Future, sync::Arc};

use futures::{FutureExt, future::BoxFuture};
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::common::parse_arguments;
use crate::{
    model::{ErrorData, GetPromptResult, JsonObject, Prompt},
    service::RequestContext,
};

#[derive(Debug)]
pub struct PromptContext {
    pub name: String,
    pub arguments: Option<JsonObject>,
    pub request: RequestContext,
}

impl PromptContext {
    pub fn argument(&self, name: &str) -> Option<&Value> {
        self.arguments.as_ref().and_then(|arguments| arguments.get(name))
    }

    /// String arguments are the common case for prompts.
    pub fn argument_str(&self, name: &str) -> Option<&str> {
        self.argument(name).and_then(Value::as_str)
    }

    pub fn parse_arguments<T: DeserializeOwned>(&self) -> Result<T, ErrorData> {
        parse_arguments(self.arguments.as_ref())
    }
}

pub type DynGetPromptHandler =
    dyn Fn(PromptContext) -> BoxFuture<'static, Result<GetPromptResult, ErrorData>> + Send + Sync;

#[derive(Clone)]
pub struct PromptRoute {
    pub attr: Prompt,
    pub get: Arc<DynGetPromptHandler>,
}

impl std::fmt::Debug for PromptRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptRoute")
            .field("name", &self.attr.name)
            .field("arguments", &self.attr.arguments)
            .finish()
    }
}

impl PromptRoute {
    pub fn new<G, Fut>(attr: Prompt, get: G) -> Self
    where
        G: Fn(PromptContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<GetPromptResult, ErrorData>> + Send + 'static,
    {
        Self {
            attr,
            get: Arc::new(move |context| get(context).boxed()),
        }
    }

    pub fn name(&self) -> &str {
        &self.attr.name
    }

    fn check_required(&self, arguments: Option<&JsonObject>) -> Result<(), ErrorData> {
        let declared = self.attr.arguments.iter().flatten();
        for argument in declared.filter(|argument| argument.required == Some(true)) {
            let present = arguments.is_some_and(|given| given.contains_key(&argument.name));
            if !present {
                return Err(ErrorData::invalid_params(
                    format!("missing required argument `{}`", argument.name),
                    None,
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct PromptRouter {
    map: HashMap<String, PromptRoute>,
}

impl PromptRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_route(&mut self, route: PromptRoute) {
        self.map.insert(route.attr.name.clone(), route);
    }

    pub fn with_route(mut self, route: PromptRoute) -> Self {
        self.add_route(route);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub async fn get(&self, context: PromptContext) -> Result<GetPromptResult, ErrorData> {
        let route = self.map.get(&context.name).ok_or_else(|| {
            ErrorData::invalid_params(format!("prompt not found: {}", context.name), None)
        })?;
        route.check_required(context.arguments.as_ref())?;
        (route.get)(context).await
    }

    pub fn list_all(&self) -> Vec<Prompt> {
        let mut prompts: Vec<Prompt> = self.map.values().map(|route| route.attr.clone()).collect();
        prompts.sort_by(|a, b| a.name.cmp(&b.name));
        prompts
    }
}
