const STYLE: &str = r#"<style>
body { font-family: sans-serif; max-width: 860px; margin: 2rem auto; padding: 0 1rem; color: #222; }
nav a { margin-right: 1rem; }
form { margin: 1.5rem 0; }
input[type=text] { width: 70%; padding: .4rem; }
pre { white-space: pre-wrap; background: #f6f6f6; padding: 1rem; border-radius: 4px; }
table { border-collapse: collapse; width: 100%; }
td, th { border-bottom: 1px solid #ddd; padding: .3rem; text-align: left; }
</style>"#;

const NAV: &str = r#"<nav><a href="/">Search</a><a href="/upload-page">Upload</a></nav>"#;

fn layout(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n{}\n</head>\n<body>\n{}\n{}\n</body>\n</html>\n",
        escape_html(title),
        STYLE,
        NAV,
        body
    )
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

pub fn search_page() -> String {
    layout(
        "Document Search",
        r#"<h1>Document Search</h1>
<form method="post" action="/search">
  <input type="text" name="query" placeholder="Ask about your documents" autofocus>
  <select name="top_k">
    <option value="3">3</option>
    <option value="5" selected>5</option>
    <option value="10">10</option>
    <option value="20">20</option>
  </select>
  <button type="submit">Search</button>
</form>"#,
    )
}

pub fn upload_page() -> String {
    layout(
        "Upload Documents",
        r#"<h1>Upload Documents</h1>
<form id="upload" enctype="multipart/form-data">
  <input type="file" name="files" multiple>
  <button type="submit">Upload</button>
</form>
<p id="result"></p>
<button id="reindex">Rebuild index</button>
<table>
  <thead><tr><th>Name</th><th>Size</th><th>Date</th><th></th></tr></thead>
  <tbody id="documents"></tbody>
</table>
<script>
async function refresh() {
  const res = await fetch('/api/documents');
  const data = await res.json();
  const rows = document.getElementById('documents');
  rows.replaceChildren();
  for (const doc of data.documents || []) {
    const tr = document.createElement('tr');
    for (const value of [doc.name, doc.size, doc.date]) {
      const td = document.createElement('td');
      td.textContent = value;
      tr.appendChild(td);
    }
    const td = document.createElement('td');
    const del = document.createElement('button');
    del.textContent = 'Delete';
    del.onclick = async () => {
      await fetch('/api/documents/' + encodeURIComponent(doc.name), { method: 'DELETE' });
      refresh();
    };
    td.appendChild(del);
    tr.appendChild(td);
    rows.appendChild(tr);
  }
}
document.getElementById('upload').onsubmit = async (e) => {
  e.preventDefault();
  const res = await fetch('/upload', { method: 'POST', body: new FormData(e.target) });
  const data = await res.json();
  document.getElementById('result').textContent = data.message || data.error;
  refresh();
};
document.getElementById('reindex').onclick = async () => {
  const res = await fetch('/api/reindex', { method: 'POST' });
  const data = await res.json();
  document.getElementById('result').textContent = data.message || data.error;
};
refresh();
</script>"#,
    )
}

pub fn results_page(query: &str, summary: &str) -> String {
    let body = format!(
        "<h1>Results</h1>\n<p><strong>Query:</strong> {}</p>\n<pre>{}</pre>\n<p><a href=\"/\">New search</a></p>",
        escape_html(query),
        escape_html(summary)
    );
    layout("Search Results", &body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_results_page_escapes_user_text() {
        let page = results_page("<script>", "a & b");
        assert!(page.contains("&lt;script&gt;"));
        assert!(page.contains("a &amp; b"));
        assert!(!page.contains("<script>"));
    }
}
