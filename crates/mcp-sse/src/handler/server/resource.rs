use std::{collections::HashMap, future::Future, sync::Arc};

use futures::{FutureExt, future::BoxFuture};

use crate::{
    model::{ErrorData, ReadResourceResult, Resource},
    service::RequestContext,
};

#[derive(Debug)]
pub struct ReadResourceContext {
    pub uri: String,
    pub request: RequestContext,
}

pub type DynReadResourceHandler = dyn Fn(
    ReadResourceContext,
) -> BoxFuture<'static, Result<ReadResourceResult, ErrorData>>
    + Send
    + Sync;

#[derive(Clone)]
pub struct ResourceRoute {
    pub attr: Resource,
    pub read: Arc<DynReadResourceHandler>,
}

impl std::fmt::Debug for ResourceRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceRoute")
            .field("uri", &self.attr.uri)
            .field("name", &self.attr.name)
            .finish()
    }
}

impl ResourceRoute {
    pub fn new<R, Fut>(attr: Resource, read: R) -> Self
    where
        R: Fn(ReadResourceContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ReadResourceResult, ErrorData>> + Send + 'static,
    {
        Self {
            attr,
            read: Arc::new(move |context| read(context).boxed()),
        }
    }

    pub fn uri(&self) -> &str {
        &self.attr.uri
    }
}

/// Resources keyed by their exact uri.
#[derive(Debug, Clone, Default)]
pub struct ResourceRouter {
    map: HashMap<String, ResourceRoute>,
}

impl ResourceRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_route(&mut self, route: ResourceRoute) {
        self.map.insert(route.attr.uri.clone(), route);
    }

    pub fn with_route(mut self, route: ResourceRoute) -> Self {
        self.add_route(route);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub async fn read(
        &self,
        context: ReadResourceContext,
    ) -> Result<ReadResourceResult, ErrorData> {
        let route = self.map.get(&context.uri).ok_or_else(|| {
            ErrorData::resource_not_found(
                "resource not found",
                Some(serde_json::json!({ "uri": context.uri })),
            )
        })?;
        (route.read)(context).await
    }

    pub fn list_all(&self) -> Vec<Resource> {
        let mut resources: Vec<Resource> =
            self.map.values().map(|route| route.attr.clone()).collect();
        resources.sort_by(|a, b| a.uri.cmp(&b.uri));
        resources
    }
}
