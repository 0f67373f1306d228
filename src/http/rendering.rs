use serde::Serialize;

const GIT_HASH: &str = env!("GIT_HASH");

struct HtmlElement {
    tag: &'static str,
    attributes: Vec<(String, String)>,
    can_have_children: bool,
    children: Option<Vec<HtmlElement>>,
    text: Option<String>,
}

enum HtmlStyle {
    CanHaveChildren, // <element ... > ... </element>
    NoChildren,      // <element ... >
}

impl HtmlElement {
    pub fn new(tag: &'static str, can_have_children: HtmlStyle) -> HtmlElement {
        HtmlElement {
            tag,
            attributes: Vec::new(),
            can_have_children: matches!(can_have_children, HtmlStyle::CanHaveChildren),
            children: match can_have_children {
                HtmlStyle::CanHaveChildren => Some(Vec::new()),
                HtmlStyle::NoChildren => None,
            },
            text: None,
        }
    }

    /// Raw markup; callers escape user-facing text with [`escape_html`].
    pub fn add_text(&mut self, text: String) {
        self.text = Some(text);
    }

    pub fn add_child(&mut self, child: HtmlElement) {
        if let Some(children) = &mut self.children {
            children.push(child);
        }
    }

    pub fn add_attribute(&mut self, key: &str, value: &str) {
        self.attributes.push((key.to_string(), value.to_string()));
    }

    pub fn with_text(mut self, text: &str) -> HtmlElement {
        self.add_text(escape_html(text));
        self
    }

    pub fn with_attribute(mut self, key: &str, value: &str) -> HtmlElement {
        self.add_attribute(key, value);
        self
    }

    pub fn render(&self) -> String {
        let mut open_tag = format!("<{}", self.tag);
        for (attr, val) in &self.attributes {
            open_tag.push_str(&format!(" {}='{}'", attr, escape_html(val)));
        }
        open_tag.push('>');
        if self.can_have_children {
            if let Some(text) = &self.text {
                open_tag.push_str(text);
            }
            if let Some(children) = &self.children {
                for child in children {
                    open_tag.push_str(&child.render());
                }
            }
            open_tag.push_str(&format!("</{}>", self.tag));
        }
        open_tag
    }
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Language {
    English,
    SimplifiedChinese,
    TraditionalChinese,
}

impl Language {
    pub fn html_lang(&self) -> &'static str {
        match self {
            Language::English => "en",
            Language::SimplifiedChinese => "zh-Hans",
            Language::TraditionalChinese => "zh-Hant",
        }
    }

    /// Pick the best supported language from an `Accept-Language` header.
    pub fn from_accept_language(header: Option<&str>) -> Language {
        let header = match header {
            Some(h) => h,
            None => return Language::English,
        };

        let mut ranges: Vec<(f32, String)> = header
            .split(',')
            .filter_map(|entry| {
                let mut pieces = entry.split(';');
                let tag = pieces.next()?.trim().to_lowercase();
                if tag.is_empty() {
                    return None;
                }
                let mut q = 1.0f32;
                for piece in pieces {
                    if let Some(v) = piece.trim().strip_prefix("q=") {
                        q = v.trim().parse().unwrap_or(0.0);
                    }
                }
                Some((q, tag))
            })
            .filter(|(q, _)| *q > 0.0)
            .collect();
        // Stable, so equal weights keep header order.
        ranges.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        ranges
            .iter()
            .find_map(|(_, tag)| Language::from_tag(tag))
            .unwrap_or(Language::English)
    }

    fn from_tag(tag: &str) -> Option<Language> {
        if tag.starts_with("zh-hant") {
            Some(Language::TraditionalChinese)
        } else if tag.starts_with("zh-hans") {
            Some(Language::SimplifiedChinese)
        } else if ["zh-tw", "zh-hk", "zh-mo"].iter().any(|p| tag.starts_with(p)) {
            Some(Language::TraditionalChinese)
        } else if tag == "zh" || tag.starts_with("zh-") {
            Some(Language::SimplifiedChinese)
        } else if tag == "en" || tag.starts_with("en-") || tag == "*" {
            Some(Language::English)
        } else {
            None
        }
    }

    fn strings(&self) -> &'static PageStrings {
        match self {
            Language::English => &ENGLISH,
            Language::SimplifiedChinese => &SIMPLIFIED_CHINESE,
            Language::TraditionalChinese => &TRADITIONAL_CHINESE,
        }
    }
}

struct PageStrings {
    title: &'static str,
    heading: &'static str,
    instructions: &'static str,
    limit: &'static str,
    upload: &'static str,
    uploading: &'static str,
    success: &'static str,
    failure: &'static str,
    too_large: &'static str,
    no_file: &'static str,
    keep_open: &'static str,
}

static ENGLISH: PageStrings = PageStrings {
    title: "AudioLooper File Transfer",
    heading: "Send a file to AudioLooper",
    instructions: "Choose an audio or video file on this computer. It appears in AudioLooper as soon as the upload finishes.",
    limit: "Maximum file size:",
    upload: "Upload",
    uploading: "Uploading…",
    success: "Upload complete. You can go back to your device.",
    failure: "Upload failed:",
    too_large: "This file is larger than the size limit.",
    no_file: "Please choose a file first.",
    keep_open: "Keep AudioLooper open until the transfer completes.",
};

static SIMPLIFIED_CHINESE: PageStrings = PageStrings {
    title: "AudioLooper 文件传输",
    heading: "将文件发送到 AudioLooper",
    instructions: "在这台电脑上选择音频或视频文件。上传完成后，文件会出现在 AudioLooper 中。",
    limit: "文件大小上限：",
    upload: "上传",
    uploading: "正在上传…",
    success: "上传完成，可以返回设备了。",
    failure: "上传失败：",
    too_large: "文件超过了大小限制。",
    no_file: "请先选择文件。",
    keep_open: "传输完成前请保持 AudioLooper 打开。",
};

static TRADITIONAL_CHINESE: PageStrings = PageStrings {
    title: "AudioLooper 檔案傳輸",
    heading: "將檔案傳送到 AudioLooper",
    instructions: "在這台電腦上選擇音訊或影片檔案。上傳完成後，檔案會出現在 AudioLooper 中。",
    limit: "檔案大小上限：",
    upload: "上傳",
    uploading: "正在上傳…",
    success: "上傳完成，可以返回裝置了。",
    failure: "上傳失敗：",
    too_large: "檔案超過了大小限制。",
    no_file: "請先選擇檔案。",
    keep_open: "傳輸完成前請保持 AudioLooper 開啟。",
};

pub fn format_size(bytes: usize) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 || value.fract() == 0.0 {
        format!("{} {}", value as u64, UNITS[unit])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

fn js_string(text: &str) -> String {
    serde_json::to_string(text).unwrap_or_else(|_| "\"\"".to_string())
}

fn upload_script(strings: &PageStrings, max_file_size: usize) -> String {
    format!(
        r#"
(function () {{
  var LIMIT = {limit};
  var form = document.getElementById('upload-form');
  var input = document.getElementById('file');
  var bar = document.getElementById('progress');
  var status = document.getElementById('status');
  form.addEventListener('submit', function (e) {{
    e.preventDefault();
    if (!input.files.length) {{ status.textContent = {no_file}; return; }}
    var file = input.files[0];
    if (file.size > LIMIT) {{ status.textContent = {too_large}; return; }}
    var data = new FormData();
    data.append('file', file, file.name);
    var xhr = new XMLHttpRequest();
    xhr.open('POST', '/upload');
    xhr.upload.onprogress = function (ev) {{
      if (ev.lengthComputable) {{ bar.value = ev.loaded / ev.total; }}
    }};
    xhr.onload = function () {{
      var message = '';
      try {{ message = JSON.parse(xhr.responseText).message || ''; }} catch (err) {{}}
      if (xhr.status === 200) {{ bar.value = 1; status.textContent = {success}; }}
      else {{ status.textContent = {failure} + ' ' + message; }}
      form.querySelector('button').disabled = false;
    }};
    xhr.onerror = function () {{
      status.textContent = {failure};
      form.querySelector('button').disabled = false;
    }};
    form.querySelector('button').disabled = true;
    bar.value = 0;
    status.textContent = {uploading};
    xhr.send(data);
  }});
}})();
"#,
        limit = max_file_size,
        no_file = js_string(strings.no_file),
        too_large = js_string(strings.too_large),
        success = js_string(strings.success),
        failure = js_string(strings.failure),
        uploading = js_string(strings.uploading),
    )
}

/// The page served at `/`: a file picker that posts to `/upload`.
pub fn render_upload_page(language: Language, max_file_size: usize) -> String {
    let strings = language.strings();

    let mut html = HtmlElement::new("html", HtmlStyle::CanHaveChildren)
        .with_attribute("lang", language.html_lang());
    let mut head = HtmlElement::new("head", HtmlStyle::CanHaveChildren);
    head.add_child(HtmlElement::new("meta", HtmlStyle::NoChildren).with_attribute("charset", "utf-8"));
    head.add_child(
        HtmlElement::new("meta", HtmlStyle::NoChildren)
            .with_attribute("name", "viewport")
            .with_attribute("content", "width=device-width, initial-scale=1"),
    );
    // <link rel="shortcut icon" href="data:image/x-icon;," type="image/x-icon">
    head.add_child(
        HtmlElement::new("link", HtmlStyle::NoChildren)
            .with_attribute("rel", "shortcut icon")
            .with_attribute("href", "data:image/x-icon;,")
            .with_attribute("type", "image/x-icon"),
    );
    head.add_child(HtmlElement::new("title", HtmlStyle::CanHaveChildren).with_text(strings.title));
    let mut style = HtmlElement::new("style", HtmlStyle::CanHaveChildren);
    style.add_text(
        r#"
    body { font-family: -apple-system, "Segoe UI", sans-serif; max-width: 40em; margin: 3em auto; padding: 0 1em; }
    progress { width: 100%; height: 1.2em; }
    #status { min-height: 1.5em; }
    footer pre { color: #888; }
    "#
        .to_string(),
    );
    head.add_child(style);
    html.add_child(head);

    let mut body = HtmlElement::new("body", HtmlStyle::CanHaveChildren);
    body.add_child(HtmlElement::new("h1", HtmlStyle::CanHaveChildren).with_text(strings.heading));
    body.add_child(HtmlElement::new("p", HtmlStyle::CanHaveChildren).with_text(strings.instructions));
    body.add_child(
        HtmlElement::new("p", HtmlStyle::CanHaveChildren)
            .with_text(&format!("{} {}", strings.limit, format_size(max_file_size))),
    );

    let mut upload_form = HtmlElement::new("form", HtmlStyle::CanHaveChildren)
        .with_attribute("id", "upload-form")
        .with_attribute("method", "post")
        .with_attribute("action", "/upload")
        .with_attribute("enctype", "multipart/form-data");
    upload_form.add_child(
        HtmlElement::new("input", HtmlStyle::NoChildren)
            .with_attribute("type", "file")
            .with_attribute("id", "file")
            .with_attribute("name", "file")
            .with_attribute("accept", "audio/*,video/*"),
    );
    upload_form.add_child(
        HtmlElement::new("button", HtmlStyle::CanHaveChildren)
            .with_attribute("type", "submit")
            .with_text(strings.upload),
    );
    body.add_child(upload_form);
    body.add_child(
        HtmlElement::new("progress", HtmlStyle::CanHaveChildren)
            .with_attribute("id", "progress")
            .with_attribute("max", "1")
            .with_attribute("value", "0"),
    );
    body.add_child(HtmlElement::new("p", HtmlStyle::CanHaveChildren).with_attribute("id", "status"));
    body.add_child(HtmlElement::new("p", HtmlStyle::CanHaveChildren).with_text(strings.keep_open));

    let mut script = HtmlElement::new("script", HtmlStyle::CanHaveChildren);
    script.add_text(upload_script(strings, max_file_size));
    body.add_child(script);

    body.add_child(generate_default_footer());
    html.add_child(body);
    format!("<!DOCTYPE html>{}", html.render())
}

fn generate_default_footer() -> HtmlElement {
    let mut footer = HtmlElement::new("footer", HtmlStyle::CanHaveChildren);
    footer.add_child(HtmlElement::new("hr", HtmlStyle::NoChildren));
    footer.add_child(HtmlElement::new("pre", HtmlStyle::CanHaveChildren).with_text(&format!(
        "loopshare {} ({})",
        env!("CARGO_PKG_VERSION"),
        GIT_HASH.trim()
    )));
    footer
}

#[derive(Serialize)]
struct StatusBody<'a> {
    status: &'a str,
    message: &'a str,
}

/// `{"status":"success"|"error","message":...}`
pub fn render_status_json(success: bool, message: &str) -> Vec<u8> {
    let body = StatusBody {
        status: if success { "success" } else { "error" },
        message,
    };
    serde_json::to_vec(&body).unwrap_or_else(|_| b"{}".to_vec())
}
