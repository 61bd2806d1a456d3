/// 处理 SurrealDB Thing ID 的序列化/反序列化辅助模块

use serde::{Deserialize, Deserializer, Serializer};

/// 事件记录 ID 既可能是纯字符串，也可能是 Thing 结构 (例如 view_event:xxxx)
pub mod thing_id {
    use super::*;

    pub fn serialize<S>(id: &str, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(id)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        match value {
            serde_json::Value::String(s) => Ok(s),
            serde_json::Value::Object(map) => {
                let tb = map.get("tb").and_then(|v| v.as_str()).unwrap_or_default();
                match map.get("id") {
                    Some(serde_json::Value::String(s)) => Ok(format!("{}:{}", tb, s)),
                    Some(serde_json::Value::Number(n)) => Ok(format!("{}:{}", tb, n)),
                    Some(serde_json::Value::Object(inner)) => {
                        // 嵌套形式 { "String": "xxxx" }
                        let raw = inner
                            .values()
                            .next()
                            .map(|v| v.as_str().map(|s| s.to_string()).unwrap_or_else(|| v.to_string()))
                            .unwrap_or_default();
                        Ok(format!("{}:{}", tb, raw))
                    }
                    _ => Ok(tb.to_string()),
                }
            }
            other => Ok(other.to_string()),
        }
    }
}
