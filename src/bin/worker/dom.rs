use anyhow::{Context, Result, anyhow, bail};
use headless_chrome::Tab;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use browser_task_agent::Observation;

/// Interactive elements reported per page; ids index into this list.
pub const MAX_INTERACTIVE: usize = 80;
pub const VISIBLE_TEXT_MAX_CHARS: usize = 8000;

/// Shared by every script: the visible interactive elements, in document
/// order, capped at `limit`. Element ids handed to the model are indexes
/// into this list, so observe/click/type must agree on it.
const VISIBLE_ELEMENTS_JS: &str = r#"
function visibleElements(limit) {
  const out = [];
  for (const el of document.querySelectorAll('a, button, input, textarea, select')) {
    const r = el.getBoundingClientRect();
    if (!r || r.width === 0 || r.height === 0) continue;
    out.push(el);
    if (out.length >= limit) break;
  }
  return out;
}
"#;

/// NON-DESTRUCTIVE snapshot: url, title, interactive elements and the
/// page's visible text.
const OBSERVE_JS: &str = r#"
({limit, textMax}) => {
  const interactive = visibleElements(limit).map((el, id) => {
    const tag = el.tagName.toLowerCase();
    const role = (tag === 'input' || tag === 'textarea') ? 'input'
               : tag === 'button' ? 'button'
               : tag === 'a' ? 'link'
               : 'control';
    const text = (el.innerText || '').trim().slice(0, 100);
    const placeholder = (el.placeholder || '').trim().slice(0, 100);
    const value = (el.value || '').toString().slice(0, 100);
    return { id, tag, role, text: text || placeholder || value || '', type: el.type || null };
  });
  const body = document.body;
  return {
    url: window.location.href,
    title: document.title,
    interactive_elements: interactive,
    visible_text: body && body.innerText ? body.innerText.slice(0, textMax) : ''
  };
}
"#;

const CLICK_JS: &str = r#"
({id, limit}) => {
  const el = visibleElements(limit)[id];
  if (!el) return { ok: false, error: 'Element not found' };
  el.click();
  return { ok: true };
}
"#;

/// Falls back to the most search-like visible text field when the chosen
/// element cannot take text; login fields score very low.
const TYPE_JS: &str = r#"
({id, limit, value}) => {
  const isVisible = (x) => { const r = x.getBoundingClientRect(); return r && r.width > 0 && r.height > 0; };
  const isTextInput = (x) => {
    if (!x) return false;
    const tag = (x.tagName || '').toLowerCase();
    if (tag === 'textarea') return true;
    if (tag !== 'input') return false;
    const t = (x.type || '').toLowerCase();
    return ['text', 'search', '', 'email'].includes(t);
  };
  const score = (x) => {
    const meta = [x.placeholder, x.getAttribute('aria-label'), x.name]
      .map(s => (s || '').toLowerCase()).join(' ');
    let s = 0;
    if (meta.includes('професс')) s += 5;
    if (meta.includes('должност')) s += 5;
    if (meta.includes('компан')) s += 4;
    if (meta.includes('поиск')) s += 3;
    if (meta.includes('search')) s += 2;
    if (meta.includes('телефон') || meta.includes('phone')) s -= 100;
    if (meta.includes('парол') || meta.includes('password')) s -= 100;
    if (meta.includes('email')) s -= 50;
    return s;
  };

  let el = visibleElements(limit)[id];
  if (!isTextInput(el)) {
    const inputs = Array.from(document.querySelectorAll('input, textarea'))
      .filter(x => isVisible(x) && isTextInput(x));
    if (!inputs.length) return { ok: false, error: 'No visible inputs found on page' };
    inputs.sort((a, b) => score(b) - score(a));
    el = inputs[0];
  }
  el.focus();
  el.value = value;
  el.dispatchEvent(new Event('input', { bubbles: true }));
  return { ok: true };
}
"#;

/// Scripts hand back `JSON.stringify` output; `Tab::evaluate` only returns
/// primitives by value.
fn call(tab: &Arc<Tab>, function: &str, arg: Value) -> Result<String> {
    let script = format!(
        "(() => {{ {VISIBLE_ELEMENTS_JS} return JSON.stringify(({function})({arg})); }})()"
    );
    match tab.evaluate(&script, false)?.value {
        Some(Value::String(json)) => Ok(json),
        other => Err(anyhow!("script returned no JSON: {other:?}")),
    }
}

/// Parse a serialized page snapshot.
pub fn decode_observation(json: &str) -> Result<Observation> {
    match serde_json::from_str::<Value>(json).context("snapshot is not JSON")? {
        Value::Object(map) => Ok(Observation(map)),
        other => Err(anyhow!("unexpected snapshot: {other}")),
    }
}

/// Parse a serialized `{ok, error}` script outcome.
fn decode_outcome(json: &str) -> Result<()> {
    let outcome: Value = serde_json::from_str(json).context("script outcome is not JSON")?;
    if outcome["ok"].as_bool() == Some(true) {
        return Ok(());
    }
    let error = outcome["error"].as_str().unwrap_or("script failed");
    bail!("{error}")
}

/// Capture the page. Retries while a navigation tears down the JS context.
pub fn observe(tab: &Arc<Tab>) -> Result<Observation> {
    let arg = json!({"limit": MAX_INTERACTIVE, "textMax": VISIBLE_TEXT_MAX_CHARS});

    for _ in 0..3 {
        match call(tab, OBSERVE_JS, arg.clone()) {
            Ok(json) => return decode_observation(&json),
            Err(err) if format!("{err:#}").contains("Execution context was destroyed") => {
                warn!("page navigated during snapshot, retrying");
                let _ = tab.wait_for_element_with_custom_timeout("body", Duration::from_secs(5));
                std::thread::sleep(Duration::from_millis(250));
            }
            Err(err) => return Err(err),
        }
    }

    let mut map = Map::new();
    map.insert("url".into(), Value::from(tab.get_url()));
    map.insert("title".into(), Value::from(""));
    map.insert("interactive_elements".into(), Value::Array(Vec::new()));
    map.insert("visible_text".into(), Value::from(""));
    Ok(Observation(map))
}

pub fn click_by_id(tab: &Arc<Tab>, element_id: u64) -> Result<()> {
    decode_outcome(&call(
        tab,
        CLICK_JS,
        json!({"id": element_id, "limit": MAX_INTERACTIVE}),
    )?)
}

pub fn type_by_id(tab: &Arc<Tab>, element_id: u64, text: &str) -> Result<()> {
    decode_outcome(&call(
        tab,
        TYPE_JS,
        json!({"id": element_id, "limit": MAX_INTERACTIVE, "value": text}),
    )?)
}

pub fn scroll(tab: &Arc<Tab>, down: bool) -> Result<()> {
    let dy = if down { 700 } else { -700 };
    tab.evaluate(&format!("window.scrollBy(0, {dy})"), false)?;
    Ok(())
}
