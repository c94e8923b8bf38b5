//! A minimal OpenAPI 3.1 document model, just enough to synthesize the
//! per-service `GET :0/openapi.json` document from registered subscriptions.
//! This is a plain data + serde model, not a general-purpose OpenAPI
//! emitter or validator.

use std::collections::BTreeMap;

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct Info {
    pub title: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Operation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(rename = "operationId")]
    pub operation_id: String,
    pub responses: BTreeMap<String, Response>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PathItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub get: Option<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post: Option<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub put: Option<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch: Option<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete: Option<Operation>,
}

impl PathItem {
    pub fn set(&mut self, method: &str, op: Operation) {
        match method.to_ascii_uppercase().as_str() {
            "GET" => self.get = Some(op),
            "POST" => self.post = Some(op),
            "PUT" => self.put = Some(op),
            "PATCH" => self.patch = Some(op),
            "DELETE" => self.delete = Some(op),
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OpenApiDoc {
    pub openapi: String,
    pub info: Info,
    pub paths: BTreeMap<String, PathItem>,
}

impl OpenApiDoc {
    pub fn new(title: impl Into<String>, version: impl Into<String>) -> Self {
        OpenApiDoc {
            openapi: "3.1.0".to_owned(),
            info: Info {
                title: title.into(),
                version: version.into(),
            },
            paths: BTreeMap::new(),
        }
    }

    /// Registers one operation at `path` for `method`, creating the path
    /// item if this is its first operation.
    pub fn add_operation(&mut self, method: &str, path: &str, operation_id: impl Into<String>) {
        let item = self.paths.entry(path.to_owned()).or_default();
        item.set(
            method,
            Operation {
                summary: None,
                operation_id: operation_id.into(),
                responses: BTreeMap::from([(
                    "200".to_owned(),
                    Response {
                        description: "OK".to_owned(),
                    },
                )]),
            },
        );
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adding_two_methods_on_the_same_path_keeps_both() {
        let mut doc = OpenApiDoc::new("widgets", "1.0.0");
        doc.add_operation("GET", "/widgets/{id}", "getWidget");
        doc.add_operation("DELETE", "/widgets/{id}", "deleteWidget");
        let item = doc.paths.get("/widgets/{id}").unwrap();
        assert!(item.get.is_some());
        assert!(item.delete.is_some());
    }

    #[test]
    fn serializes_to_valid_json() {
        let mut doc = OpenApiDoc::new("widgets", "1.0.0");
        doc.add_operation("GET", "/widgets", "listWidgets");
        let json = doc.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["openapi"], "3.1.0");
        assert_eq!(value["paths"]["/widgets"]["get"]["operationId"], "listWidgets");
    }
}
