//! HTML rendering of the catalog tree for browser clients.

use crate::tree::Tree;
use imgsrv_db::Image;

const PAGE_HEAD: &str = "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
<title>images</title>\n\
<style>body{font-family:monospace}ul{list-style:none}a{text-decoration:none}</style>\n\
</head>\n<body>\n<h1>images</h1>\n";

const PAGE_FOOT: &str = "</body>\n</html>\n";

/// Render the full index page for a tree built from catalog rows.
pub fn index_page(tree: &Tree) -> String {
    let mut out = String::with_capacity(1024);
    out.push_str(PAGE_HEAD);
    out.push_str("<ul>\n");
    for img in tree.images() {
        image_item(&mut out, img);
    }
    for child in tree.children() {
        node(&mut out, child);
    }
    out.push_str("</ul>\n");
    out.push_str(PAGE_FOOT);
    out
}

fn node(out: &mut String, tree: &Tree) {
    out.push_str("<li>");
    escape_into(out, tree.name());
    out.push_str("\n<ul>\n");
    for img in tree.images() {
        image_item(out, img);
    }
    for child in tree.children() {
        node(out, child);
    }
    out.push_str("</ul>\n</li>\n");
}

fn image_item(out: &mut String, img: &Image) {
    out.push_str("<li><a href=\"");
    escape_into(out, &img.endpoint());
    out.push_str("\">");
    escape_into(out, &img.name);
    out.push_str("</a></li>\n");
}

fn escape_into(out: &mut String, text: &str) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            other => out.push(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn img(driver: &str, category: &str, group: &str, name: &str) -> Image {
        Image {
            path: format!("/store/{driver}/{name}"),
            driver: driver.to_string(),
            category: category.to_string(),
            group: group.to_string(),
            name: name.to_string(),
            link: String::new(),
            mod_time: Utc::now(),
        }
    }

    #[test]
    fn page_nests_levels_and_links_images() {
        let mut tree = Tree::new();
        tree.put(img("qemu", "stable", "beta", "beta-1"));

        let page = index_page(&tree);
        assert!(page.contains("<li>qemu"));
        assert!(page.contains("<li>stable"));
        assert!(page.contains("<li>beta"));
        assert!(page.contains("<a href=\"/qemu/stable/beta-1\">beta-1</a>"));
    }

    #[test]
    fn names_are_escaped() {
        let mut tree = Tree::new();
        tree.put(img("qemu", "", "", "a<b>.img"));

        let page = index_page(&tree);
        assert!(page.contains("a&lt;b&gt;.img"));
        assert!(!page.contains("a<b>.img"));
    }

    #[test]
    fn empty_tree_renders_empty_list() {
        let page = index_page(&Tree::new());
        assert!(page.contains("<ul>\n</ul>"));
    }
}
