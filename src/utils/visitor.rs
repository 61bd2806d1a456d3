use crate::models::analytics::VisitorIdentity;
use axum::http::HeaderMap;

/// 访客侧维度提取：身份信号、UA 归类、referrer 主机名归并。
/// 这些都属于尽力而为的富化，解析不出来就回落到 Unknown/原始值，
/// 绝不阻塞浏览事件本身的记录。

const SESSION_COOKIE: &str = "prism_session";

/// 从请求头提取访客身份信号
pub fn identity_from_headers(headers: &HeaderMap) -> VisitorIdentity {
    VisitorIdentity {
        session_id: session_id(headers),
        user_id: header_str(headers, "x-user-id").and_then(|v| v.parse::<i64>().ok()),
        ip_address: client_ip(headers),
    }
}

/// 会话标识：优先 Cookie，其次网关透传的 x-session-id
fn session_id(headers: &HeaderMap) -> Option<String> {
    if let Some(cookie_header) = header_str(headers, "cookie") {
        for pair in cookie_header.split(';') {
            let mut parts = pair.trim().splitn(2, '=');
            if parts.next() == Some(SESSION_COOKIE) {
                if let Some(value) = parts.next() {
                    if !value.is_empty() {
                        return Some(value.to_string());
                    }
                }
            }
        }
    }
    header_str(headers, "x-session-id").map(|v| v.to_string())
}

/// 客户端 IP：x-forwarded-for 的第一跳，退回 x-real-ip
pub fn client_ip(headers: &HeaderMap) -> Option<String> {
    if let Some(forwarded_for) = header_str(headers, "x-forwarded-for") {
        if let Some(ip) = forwarded_for.split(',').next() {
            let ip = ip.trim();
            if !ip.is_empty() {
                return Some(ip.to_string());
            }
        }
    }
    header_str(headers, "x-real-ip").map(|v| v.trim().to_string())
}

pub fn country(headers: &HeaderMap) -> Option<String> {
    header_str(headers, "cf-ipcountry")
        .filter(|v| !v.is_empty() && *v != "XX")
        .map(|v| v.to_string())
}

pub fn referrer(headers: &HeaderMap) -> Option<String> {
    header_str(headers, "referer")
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
}

pub fn user_agent(headers: &HeaderMap) -> Option<String> {
    header_str(headers, "user-agent")
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// UA 串归类出的设备画像
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAgentProfile {
    pub device_type: String,
    pub browser: String,
    pub os: String,
}

/// 朴素的 UA 归类，识别不出来统一落 Unknown
pub fn classify_user_agent(user_agent: Option<&str>) -> UserAgentProfile {
    let Some(raw) = user_agent else {
        return UserAgentProfile {
            device_type: "Unknown".to_string(),
            browser: "Unknown".to_string(),
            os: "Unknown".to_string(),
        };
    };
    let ua = raw.to_lowercase();

    let device_type = if ua.contains("ipad") || ua.contains("tablet") {
        "Tablet"
    } else if ua.contains("mobile") || ua.contains("iphone") || ua.contains("android") {
        "Mobile"
    } else {
        "Desktop"
    };

    // 顺序有讲究：Edge/Opera 的 UA 里也带 chrome，Chrome 的 UA 里也带 safari
    let browser = if ua.contains("edg/") || ua.contains("edge") {
        "Edge"
    } else if ua.contains("opr/") || ua.contains("opera") {
        "Opera"
    } else if ua.contains("firefox") {
        "Firefox"
    } else if ua.contains("chrome") || ua.contains("crios") {
        "Chrome"
    } else if ua.contains("safari") {
        "Safari"
    } else if ua.contains("msie") || ua.contains("trident") {
        "Internet Explorer"
    } else {
        "Unknown"
    };

    let os = if ua.contains("android") {
        "Android"
    } else if ua.contains("iphone") || ua.contains("ipad") || ua.contains("ios") {
        "iOS"
    } else if ua.contains("windows") {
        "Windows"
    } else if ua.contains("mac os") || ua.contains("macintosh") {
        "macOS"
    } else if ua.contains("linux") {
        "Linux"
    } else {
        "Unknown"
    };

    UserAgentProfile {
        device_type: device_type.to_string(),
        browser: browser.to_string(),
        os: os.to_string(),
    }
}

/// referrer 归并为主机名，解析失败保留原始值
pub fn referrer_host(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(parsed) => parsed
            .host_str()
            .map(|host| host.to_string())
            .unwrap_or_else(|| raw.to_string()),
        Err(_) => raw.to_string(),
    }
}
