/// Token估算规则
#[derive(Debug, Clone, Copy)]
pub struct TokenCalculationRules {
    /// 拉丁字符的平均字符数/token
    pub latin_chars_per_token: f64,
    /// CJK字符的平均字符数/token
    pub cjk_chars_per_token: f64,
    /// 每条消息的固定开销
    pub message_overhead: usize,
}

impl Default for TokenCalculationRules {
    fn default() -> Self {
        Self {
            latin_chars_per_token: 4.0,
            cjk_chars_per_token: 1.5,
            message_overhead: 4,
        }
    }
}

/// Token估算结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenEstimation {
    pub estimated_tokens: usize,
    pub character_count: usize,
    pub cjk_char_count: usize,
}

/// 基于字符数的token估算器，用于provider不返回用量时的近似统计
#[derive(Debug, Clone, Default)]
pub struct TokenEstimator {
    rules: TokenCalculationRules,
}

impl TokenEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: TokenCalculationRules) -> Self {
        Self { rules }
    }

    pub fn estimate_tokens(&self, text: &str) -> TokenEstimation {
        if text.is_empty() {
            return TokenEstimation {
                estimated_tokens: 0,
                character_count: 0,
                cjk_char_count: 0,
            };
        }

        let character_count = text.chars().count();
        let cjk_char_count = text.chars().filter(|c| is_cjk(*c)).count();
        let latin_count = character_count - cjk_char_count;

        let cjk_tokens = (cjk_char_count as f64 / self.rules.cjk_chars_per_token).ceil() as usize;
        let latin_tokens = (latin_count as f64 / self.rules.latin_chars_per_token).ceil() as usize;

        TokenEstimation {
            estimated_tokens: cjk_tokens + latin_tokens + self.rules.message_overhead,
            character_count,
            cjk_char_count,
        }
    }
}

fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x4E00..=0x9FFF |
        0x3400..=0x4DBF |
        0x20000..=0x2EBEF |
        0x30000..=0x3134F
    )
}
