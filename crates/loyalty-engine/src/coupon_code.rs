//! 券码生成与哈希
//!
//! 券码取自 32 个不易混淆的字符（去掉 I、O、0、1），默认 20 位（约 100 bit 熵），
//! 每 4 位用 `-` 分隔。数据库只保存规范化后的 SHA-256 十六进制哈希。

use rand::Rng;
use sha2::{Digest, Sha256};

/// 券码字符表
pub const ALPHABET: &[u8; 32] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// 二维码载荷前缀
pub const QR_PREFIX: &str = "loyalty://coupon/";

const GROUP_SIZE: usize = 4;

/// 生成 `length` 位随机券码，按 4 位分组
pub fn generate(length: usize) -> String {
    let mut rng = rand::rng();
    let mut code = String::with_capacity(length + length / GROUP_SIZE);
    for i in 0..length {
        if i > 0 && i % GROUP_SIZE == 0 {
            code.push('-');
        }
        let idx = rng.random_range(0..ALPHABET.len());
        code.push(char::from(ALPHABET[idx]));
    }
    code
}

/// 规范化用户输入：去掉二维码前缀、分隔符和空白，转为大写
pub fn normalize(input: &str) -> String {
    let trimmed = input.trim();
    let body = match trimmed.get(..QR_PREFIX.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(QR_PREFIX) => &trimmed[QR_PREFIX.len()..],
        _ => trimmed,
    };
    body.chars()
        .filter(|c| *c != '-' && !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// 规范化后计算 SHA-256 十六进制哈希
pub fn hash(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize(code).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// 二维码内容
pub fn qr_payload(code: &str) -> String {
    format!("{}{}", QR_PREFIX, code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generate_format() {
        let code = generate(20);
        assert_eq!(code.len(), 24);
        let groups: Vec<&str> = code.split('-').collect();
        assert_eq!(groups.len(), 5);
        assert!(groups.iter().all(|g| g.len() == 4));
        assert!(
            normalize(&code)
                .bytes()
                .all(|b| ALPHABET.contains(&b))
        );
    }

    #[test]
    fn test_generate_is_unique() {
        let codes: HashSet<String> = (0..1000).map(|_| generate(20)).collect();
        assert_eq!(codes.len(), 1000);
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(" abcd-efgh "), "ABCDEFGH");
        assert_eq!(normalize("loyalty://coupon/ABCD-EFGH"), "ABCDEFGH");
        assert_eq!(normalize("LOYALTY://COUPON/abcd efgh"), "ABCDEFGH");
    }

    #[test]
    fn test_hash_ignores_formatting() {
        let code = generate(20);
        assert_eq!(hash(&code), hash(&code.to_lowercase().replace('-', " ")));
        assert_eq!(hash(&code), hash(&qr_payload(&code)));
        assert_eq!(hash(&code).len(), 64);
        assert_ne!(hash(&code), hash(&generate(20)));
    }
}
