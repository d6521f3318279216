use browser_dom::{Attr, NullEngine, Page, Result, StaticFetcher};

fn load(html: &str) -> Result<Page<NullEngine, StaticFetcher>> {
    Page::load("https://example.test/", html, NullEngine, StaticFetcher::new())
}

#[test]
fn tag_collection_tracks_structural_mutations() -> Result<()> {
    let mut page = load("<body><p>one</p></body>")?;
    let body = page.document().body().expect("body");
    let paragraphs = page.document_mut().get_elements_by_tag_name("p");
    assert_eq!(page.document_mut().collection_length(paragraphs), 1);

    let second = page.document_mut().create_element("p");
    page.append_child(body, second)?;
    assert_eq!(page.document_mut().collection_length(paragraphs), 2);

    let third = page.document_mut().create_element("p");
    page.insert_before(body, third, Some(second))?;
    let nodes = page.document_mut().collection_nodes(paragraphs);
    assert_eq!(nodes.len(), 3);
    assert_eq!(nodes[1], third);
    assert_eq!(nodes[2], second);

    let div = page.document_mut().create_element("div");
    page.replace_child(body, div, second)?;
    assert_eq!(page.document_mut().collection_length(paragraphs), 2);
    Ok(())
}

#[test]
fn name_collection_sees_attribute_edits() -> Result<()> {
    let mut page = load("<body><input name='q'><input name='q'></body>")?;
    let inputs = page.document_mut().get_elements_by_name("q");
    assert_eq!(page.document_mut().collection_length(inputs), 2);

    let first = page
        .document_mut()
        .collection_item(inputs, 0)
        .expect("first input");
    page.document_mut().set_attribute(first, "name", "renamed")?;
    assert_eq!(page.document_mut().collection_length(inputs), 1);

    page.document_mut().remove_attribute(first, "name")?;
    assert_eq!(page.document_mut().collection_length(inputs), 1);
    page.document_mut().set_attribute(first, "name", "q")?;
    assert_eq!(page.document_mut().collection_length(inputs), 2);
    Ok(())
}

#[test]
fn attribute_node_installation_reaches_name_collections() -> Result<()> {
    let mut page = load("<body><input name='q'><input></body>")?;
    let inputs = page.document_mut().get_elements_by_name("q");
    assert_eq!(page.document_mut().collection_length(inputs), 1);

    let body = page.document().body().expect("body");
    let second = page.document().child_nodes(body)[1];
    let replaced = page
        .document_mut()
        .set_attribute_node(second, Attr::new("NAME", "q"))?;
    assert!(replaced.is_none());
    assert_eq!(page.document_mut().collection_length(inputs), 2);

    let replaced = page
        .document_mut()
        .set_attribute_node(second, Attr::new("name", "other"))?;
    assert_eq!(replaced, Some(Attr::new("name", "q")));
    assert_eq!(page.document_mut().collection_length(inputs), 1);
    Ok(())
}

#[test]
fn collections_follow_markup_level_replacement() -> Result<()> {
    let mut page = load("<body><div id='host'><span>a</span></div></body>")?;
    let host = page.document_mut().get_element_by_id("host").expect("host");
    let spans = page.document_mut().get_elements_by_tag_name("span");
    assert_eq!(page.document_mut().collection_length(spans), 1);

    page.document_mut()
        .set_inner_html(host, "<span>b</span><span>c</span>")?;
    assert_eq!(page.document_mut().collection_length(spans), 2);

    page.insert_adjacent_html(host, "afterend", "<span>d</span>")?;
    assert_eq!(page.document_mut().collection_length(spans), 3);

    page.document_mut().set_inner_html(host, "")?;
    assert_eq!(page.document_mut().collection_length(spans), 1);

    // outerHTML assignment replaces the host subtree wholesale.
    page.document_mut()
        .set_outer_html(host, "<span>e</span><span>f</span>")?;
    assert_eq!(page.document_mut().collection_length(spans), 3);
    Ok(())
}

#[test]
fn repeated_lookups_intern_to_the_same_handle() -> Result<()> {
    let mut page = load("<body><div id='scope'><em>x</em></div></body>")?;
    let scope = page.document_mut().get_element_by_id("scope").expect("scope");

    let a = page.document_mut().get_elements_by_tag_name("em");
    let b = page.document_mut().get_elements_by_tag_name("em");
    let scoped = page.document_mut().get_elements_by_tag_name_within(scope, "em");
    assert_eq!(a, b);
    assert_ne!(a, scoped);

    let class_a = page.document_mut().get_elements_by_class_name("hot");
    let class_b = page.document_mut().get_elements_by_class_name("hot");
    assert_eq!(class_a, class_b);
    Ok(())
}

#[test]
fn wildcard_and_class_collections_stay_live() -> Result<()> {
    let mut page = load("<body><div class='hot'>a</div></body>")?;
    let hot = page.document_mut().get_elements_by_class_name("hot");
    let all = page.document_mut().get_elements_by_tag_name("*");
    assert_eq!(page.document_mut().collection_length(hot), 1);
    let before = page.document_mut().collection_length(all);

    let body = page.document().body().expect("body");
    page.insert_adjacent_html(body, "beforeend", "<p class='hot cold'>b</p>")?;
    assert_eq!(page.document_mut().collection_length(hot), 2);
    assert_eq!(page.document_mut().collection_length(all), before + 1);
    Ok(())
}

#[test]
fn document_reset_orphans_element_scoped_collections() -> Result<()> {
    let mut page = load("<body><div id='scope'><span>a</span></div></body>")?;
    let scope = page.document_mut().get_element_by_id("scope").expect("scope");
    let scoped = page.document_mut().get_elements_by_tag_name_within(scope, "span");
    let global = page.document_mut().get_elements_by_tag_name("span");
    assert_eq!(page.document_mut().collection_length(scoped), 1);
    assert_eq!(page.document_mut().collection_length(global), 1);

    // An implicit open() through write replaces the whole tree.
    page.write("<span>x</span><span>y</span>")?;
    page.close()?;

    assert_eq!(page.document_mut().collection_length(scoped), 0);
    assert_eq!(page.document_mut().collection_length(global), 2);
    Ok(())
}
