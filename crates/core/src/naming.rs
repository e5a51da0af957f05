//! Kubernetes 이름 규칙 검증 (RFC 1123 DNS label)

/// DNS label 최대 길이
pub const MAX_DNS_LABEL_LEN: usize = 63;

/// 값이 RFC 1123 DNS label인지 검증합니다.
///
/// 소문자 영숫자와 `-`만 허용하며, 영숫자로 시작하고 끝나야 합니다.
/// 언더스코어는 허용되지 않습니다.
pub fn validate_dns_label(value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Err("must not be empty".to_owned());
    }
    if value.len() > MAX_DNS_LABEL_LEN {
        return Err(format!(
            "length {} exceeds {MAX_DNS_LABEL_LEN} characters",
            value.len()
        ));
    }
    if let Some(bad) = value
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-'))
    {
        return Err(format!("contains invalid character '{bad}'"));
    }
    if value.starts_with('-') || value.ends_with('-') {
        return Err("must start and end with an alphanumeric character".to_owned());
    }
    Ok(())
}
