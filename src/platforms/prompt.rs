//! プロンプト挿入
//!
//! ページの入力欄はホストごとに異なる（textarea / contenteditable）。
//! DOM 操作自体は [`PromptSurface`] / [`PromptInput`] の実装側が担い、
//! ここでは挿入手順とフォールバックだけを決める。

/// 入力欄の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// value を直接設定できる入力欄
    PlainText,
    /// HTML 段落で内容を組み立てる編集可能要素
    ContentEditable,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PromptError {
    #[error("Input rejected the operation: {0}")]
    Rejected(String),
    #[error("Operation not supported by this input")]
    Unsupported,
}

/// ページ上の一つの入力欄
pub trait PromptInput {
    fn kind(&self) -> InputKind;

    fn focus(&self);

    fn set_value(&self, value: &str) -> Result<(), PromptError>;

    fn set_inner_html(&self, html: &str) -> Result<(), PromptError>;

    /// `input` イベントを通知（フレームワーク側の状態更新用）
    fn dispatch_input(&self);

    /// キャレットを文字オフセットへ移動
    fn set_caret(&self, offset: usize);

    /// insertText コマンド相当のフォールバック
    fn insert_text(&self, text: &str) -> Result<(), PromptError>;
}

/// セレクタで入力欄を探せるページ
pub trait PromptSurface {
    fn find_input(&self, selector: &str) -> Option<Box<dyn PromptInput + '_>>;
}

/// HTML 特殊文字をエスケープ
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#039;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// 行ごとに `<p>` 段落を生成（空行は `<p><br></p>`）
pub fn paragraphs_html(content: &str) -> String {
    content
        .split('\n')
        .map(|line| {
            let escaped = escape_html(line);
            if escaped.is_empty() {
                "<p><br></p>".to_string()
            } else {
                format!("<p>{}</p>", escaped)
            }
        })
        .collect()
}

/// 入力欄へ内容を挿入し、成功したかを返す
pub fn insert_prompt(surface: &dyn PromptSurface, selector: &str, content: &str) -> bool {
    if content.is_empty() {
        tracing::warn!("⚠️ No content to insert");
        return false;
    }

    let Some(input) = surface.find_input(selector) else {
        tracing::warn!("❌ Could not find prompt input: {}", selector);
        return false;
    };

    let normalized = content.replace("\r\n", "\n");
    input.focus();

    let primary = match input.kind() {
        InputKind::PlainText => input.set_value(&normalized),
        InputKind::ContentEditable => input.set_inner_html(&paragraphs_html(&normalized)),
    };

    match primary {
        Ok(()) => {
            input.dispatch_input();
            input.set_caret(normalized.chars().count());
            return true;
        }
        Err(e) => tracing::warn!("⚠️ Primary insertion failed: {}", e),
    }

    match input.insert_text(&normalized) {
        Ok(()) => true,
        Err(e) => {
            tracing::error!("❌ All insertion methods failed: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paragraphs_escape_and_blank_lines() {
        assert_eq!(
            paragraphs_html("a < b\n\n\"quoted\" & 'single'"),
            "<p>a &lt; b</p><p><br></p><p>&quot;quoted&quot; &amp; &#039;single&#039;</p>"
        );
    }
}
