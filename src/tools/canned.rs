//! Canned travel tools for offline rollouts.
//!
//! Each [`CannedTool`] answers with a fixed template in which `{key}` is
//! replaced by the string value of the matching argument. They stand in for
//! the live map, flight and search servers when running with `--mock`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use super::{Tool, ToolRegistry, ToolSchema};

/// A tool that renders a fixed reply template.
#[derive(Debug)]
pub struct CannedTool {
    schema: ToolSchema,
    template: String,
    calls: AtomicUsize,
}

impl CannedTool {
    pub fn new(schema: ToolSchema, template: impl Into<String>) -> Self {
        Self {
            schema,
            template: template.into(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of times this tool has been called.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tool for CannedTool {
    fn schema(&self) -> ToolSchema {
        self.schema.clone()
    }

    async fn call(&self, arguments: serde_json::Value) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut reply = self.template.clone();
        if let Some(args) = arguments.as_object() {
            for (key, value) in args {
                let text = match value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                reply = reply.replace(&format!("{{{key}}}"), &text);
            }
        }
        Ok(reply)
    }
}

fn schema(name: &str, description: &str, required: &[&str]) -> ToolSchema {
    let properties: serde_json::Map<String, serde_json::Value> = required
        .iter()
        .map(|p| (p.to_string(), serde_json::json!({"type": "string"})))
        .collect();
    ToolSchema {
        name: name.to_string(),
        description: description.to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        }),
    }
}

/// The travel catalog: points of interest, nearby search, web search, flights
/// and directions.
pub fn travel_registry() -> ToolRegistry {
    let tools: Vec<Arc<dyn Tool>> = vec![
        Arc::new(CannedTool::new(
            schema(
                "poi_search",
                "Search points of interest inside a city.",
                &["city", "keywords"],
            ),
            "Top results for {keywords} in {city}: 1. West Lake (free, open all day); \
             2. Lingyin Temple (75 CNY, 07:00-18:00); 3. Hefang Street (night market).",
        )),
        Arc::new(CannedTool::new(
            schema(
                "around_search",
                "Search places within a radius of a point.",
                &["location", "radius"],
            ),
            "Within {radius} m of {location}: Grandma's Kitchen (Hangzhou cuisine, ~80 CNY pp); \
             Orange Hotel (4.6 rating, ~450 CNY/night).",
        )),
        Arc::new(CannedTool::new(
            schema("web_search", "General open-knowledge web search.", &["query"]),
            "Search results for \"{query}\": best season is spring and autumn; \
             Longjing tea villages are 20 minutes from West Lake by taxi.",
        )),
        Arc::new(CannedTool::new(
            schema(
                "search_flights",
                "Search flights between two cities on a date.",
                &["date", "from_city", "to_city"],
            ),
            "[\"Flight CA1702, 763.0 CNY, departs {from_city} 09:05, arrives {to_city} 11:20, 2h15m\", \
             \"Flight MU5131, 820.0 CNY, departs {from_city} 14:30, arrives {to_city} 16:40, 2h10m\"]",
        )),
        Arc::new(CannedTool::new(
            schema(
                "direction",
                "Plan a route between an origin and a destination.",
                &["origin", "destination"],
            ),
            "Route {origin} -> {destination}: metro line 1 then 10 min walk, about 35 minutes, 4 CNY.",
        )),
    ];

    tools
        .into_iter()
        .fold(ToolRegistry::new(), |registry, tool| registry.with_tool(tool))
}
