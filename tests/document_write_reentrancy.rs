use browser_dom::{Error, Page, Result, ScriptedEngine, StaticFetcher};

fn scripted(html: &str, fetcher: StaticFetcher) -> Result<Page<ScriptedEngine, StaticFetcher>> {
    Page::load("https://example.test/", html, ScriptedEngine::new(), fetcher)
}

#[test]
fn write_discovered_script_runs_before_the_writer_resumes() -> Result<()> {
    let fetcher = StaticFetcher::new().with_script(
        "https://example.test/outer.js",
        "log('1'); write('<script>log('2')</script>'); log('3')",
    );
    let page = scripted(
        "<body><script src='/outer.js'></script><script>log('4')</script></body>",
        fetcher,
    )?;
    assert_eq!(page.engine().log(), ["1", "2", "3", "4"]);
    Ok(())
}

#[test]
fn written_markup_lands_before_the_unconsumed_source() -> Result<()> {
    let fetcher = StaticFetcher::new()
        .with_script("https://example.test/w.js", "write('<p id=\"w\">written</p>')");
    let page = scripted(
        "<body><script src='/w.js'></script><p id='after'>tail</p></body>",
        fetcher,
    )?;
    let body = page.document().body().expect("body");
    assert_eq!(
        page.document().inner_html(body),
        "<script src=\"/w.js\"></script><p id=\"w\">written</p><p id=\"after\">tail</p>"
    );
    Ok(())
}

#[test]
fn incomplete_write_buffers_until_more_input_arrives() -> Result<()> {
    // The first write ends mid-tag; nothing may be inserted until the
    // second write completes it.
    let fetcher = StaticFetcher::new()
        .with_script("https://example.test/w.js", "write('<p '); write('id=\"x\">y</p>')");
    let mut page = scripted("<body><script src='/w.js'></script></body>", fetcher)?;
    let p = page.document_mut().get_element_by_id("x").expect("joined tag");
    assert_eq!(page.document().text_content(p), "y");
    Ok(())
}

#[test]
fn write_injected_external_script_is_postponed_behind_the_writer() -> Result<()> {
    let fetcher = StaticFetcher::new()
        .with_script(
            "https://example.test/outer.js",
            "write('<script src=\"/ext.js\"></script>'); log('sync-after')",
        )
        .with_script("https://example.test/ext.js", "log('external')");
    let page = scripted("<body><script src='/outer.js'></script></body>", fetcher)?;
    assert_eq!(page.engine().log(), ["sync-after", "external"]);
    Ok(())
}

#[test]
fn inline_script_behind_a_pending_external_is_postponed_too() -> Result<()> {
    let fetcher = StaticFetcher::new()
        .with_script(
            "https://example.test/outer.js",
            "write('<script src=\"/ext.js\"></script>'); \
             write('<script>log('late-inline')</script>'); \
             log('outer-done')",
        )
        .with_script("https://example.test/ext.js", "log('external')");
    let page = scripted("<body><script src='/outer.js'></script></body>", fetcher)?;
    assert_eq!(page.engine().log(), ["outer-done", "external", "late-inline"]);
    Ok(())
}

#[test]
fn write_after_load_discards_the_old_document() -> Result<()> {
    let mut page = scripted("<body><p id='old'>gone</p></body>", StaticFetcher::new())?;
    assert!(page.document_mut().get_element_by_id("old").is_some());
    assert_eq!(page.document().ready_state().as_dom_string(), "complete");

    page.write("<p id='fresh'>kept</p>")?;
    assert!(page.document().is_parsing());
    assert_eq!(page.document().ready_state().as_dom_string(), "loading");
    page.close()?;

    assert!(page.document_mut().get_element_by_id("old").is_none());
    let fresh = page.document_mut().get_element_by_id("fresh").expect("fresh");
    assert_eq!(page.document().text_content(fresh), "kept");
    assert_eq!(page.document().ready_state().as_dom_string(), "complete");
    // The document url survives the reset.
    assert_eq!(page.document().url().as_deref(), Some("https://example.test/"));
    Ok(())
}

#[test]
fn handles_from_a_discarded_document_go_stale() -> Result<()> {
    let mut page = scripted("<body><ul id='menu'><li>a</li></ul></body>", StaticFetcher::new())?;
    let stale = page.document_mut().get_element_by_id("menu").expect("menu");

    // The implicit open() replaces the whole tree; the old handle must not
    // resolve to whatever now occupies its arena slot.
    page.write("<p id='fresh'>new</p>")?;
    page.close()?;

    assert_eq!(page.document().tag_name(stale), None);
    assert!(page.document().get_attribute(stale, "id").is_none());
    assert!(matches!(
        page.document_mut().set_attribute(stale, "class", "x"),
        Err(Error::DetachedNode(_))
    ));
    let fresh = page.document_mut().get_element_by_id("fresh").expect("fresh");
    assert_eq!(page.document().tag_name(fresh), Some("p"));
    Ok(())
}

#[test]
fn entity_split_across_writes_decodes_like_one_stream() -> Result<()> {
    let mut page = scripted("<body></body>", StaticFetcher::new())?;
    page.write("<p id='x'>a&am")?;
    page.write("p;b</p>")?;
    page.close()?;
    let p = page.document_mut().get_element_by_id("x").expect("p");
    assert_eq!(page.document().text_content(p), "a&b");
    Ok(())
}

#[test]
fn writeln_appends_a_newline_to_the_stream() -> Result<()> {
    let mut page = scripted("<body></body>", StaticFetcher::new())?;
    page.writeln("<pre>a")?;
    page.writeln("b</pre>")?;
    page.close()?;
    let body = page.document().body().expect("body");
    assert_eq!(page.document().text_content(body), "a\nb\n");
    Ok(())
}

#[test]
fn open_is_ignored_while_the_parser_is_active() -> Result<()> {
    let fetcher =
        StaticFetcher::new().with_script("https://example.test/o.js", "open(); log('survived')");
    let mut page = scripted(
        "<body><p id='keep'>x</p><script src='/o.js'></script></body>",
        fetcher,
    )?;
    assert_eq!(page.engine().log(), ["survived"]);
    assert!(page.document_mut().get_element_by_id("keep").is_some());
    Ok(())
}
