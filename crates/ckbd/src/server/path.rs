//! Repo ids contain `/`, so `/index/repos/{id}/...` cannot be routed on
//! path segments alone. Handlers receive the wildcard tail and resolve the
//! operation by trimming the known suffixes; for single-symbol fetches the
//! split happens at the last `/symbols/` marker, since symbol ids may
//! themselves contain slashes.

#[derive(Debug, PartialEq, Eq)]
pub enum GetRoute<'a> {
    Meta(&'a str),
    Symbols(&'a str),
    Symbol { repo: &'a str, symbol: &'a str },
    Files(&'a str),
    Refs(&'a str),
    Callgraph(&'a str),
    SearchSymbols(&'a str),
    SearchFiles(&'a str),
}

#[derive(Debug, PartialEq, Eq)]
pub enum PostRoute<'a> {
    Upload(&'a str),
    UploadDelta(&'a str),
    BatchGet(&'a str),
}

type GetRouteBuilder = for<'a> fn(&'a str) -> GetRoute<'a>;

pub fn parse_get(tail: &str) -> Option<GetRoute<'_>> {
    let routes: [(&str, GetRouteBuilder); 7] = [
        ("/search/symbols", (|s| GetRoute::SearchSymbols(s)) as GetRouteBuilder),
        ("/search/files", (|s| GetRoute::SearchFiles(s)) as GetRouteBuilder),
        ("/meta", (|s| GetRoute::Meta(s)) as GetRouteBuilder),
        ("/symbols", (|s| GetRoute::Symbols(s)) as GetRouteBuilder),
        ("/files", (|s| GetRoute::Files(s)) as GetRouteBuilder),
        ("/refs", (|s| GetRoute::Refs(s)) as GetRouteBuilder),
        ("/callgraph", (|s| GetRoute::Callgraph(s)) as GetRouteBuilder),
    ];
    for (suffix, build) in routes {
        if let Some(repo) = tail.strip_suffix(suffix).filter(|repo| !repo.is_empty()) {
            return Some(build(repo));
        }
    }

    let split = tail.rfind("/symbols/")?;
    let (repo, rest) = tail.split_at(split);
    let symbol = &rest["/symbols/".len()..];
    (!repo.is_empty() && !symbol.is_empty()).then_some(GetRoute::Symbol { repo, symbol })
}

type PostRouteBuilder = for<'a> fn(&'a str) -> PostRoute<'a>;

pub fn parse_post(tail: &str) -> Option<PostRoute<'_>> {
    let routes: [(&str, PostRouteBuilder); 3] = [
        ("/upload/delta", (|s| PostRoute::UploadDelta(s)) as PostRouteBuilder),
        ("/upload", (|s| PostRoute::Upload(s)) as PostRouteBuilder),
        ("/symbols:batchGet", (|s| PostRoute::BatchGet(s)) as PostRouteBuilder),
    ];
    for (suffix, build) in routes {
        if let Some(repo) = tail.strip_suffix(suffix).filter(|repo| !repo.is_empty()) {
            return Some(build(repo));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_routes() {
        assert_eq!(parse_get("acme/core/meta"), Some(GetRoute::Meta("acme/core")));
        assert_eq!(
            parse_get("acme/core/symbols"),
            Some(GetRoute::Symbols("acme/core")),
        );
        assert_eq!(
            parse_get("acme/core/search/symbols"),
            Some(GetRoute::SearchSymbols("acme/core")),
        );
        assert_eq!(
            parse_get("acme/core/search/files"),
            Some(GetRoute::SearchFiles("acme/core")),
        );
        assert_eq!(parse_get("a/files"), Some(GetRoute::Files("a")));
        assert_eq!(parse_get("a/refs"), Some(GetRoute::Refs("a")));
        assert_eq!(parse_get("a/callgraph"), Some(GetRoute::Callgraph("a")));
    }

    #[test]
    fn symbol_ids_may_contain_slashes() {
        assert_eq!(
            parse_get("acme/core/symbols/scip-go gomod pkg/Frob#munge()."),
            Some(GetRoute::Symbol {
                repo: "acme/core",
                symbol: "scip-go gomod pkg/Frob#munge().",
            }),
        );
        // The split happens at the last marker.
        assert_eq!(
            parse_get("acme/symbols/core/symbols/sym"),
            Some(GetRoute::Symbol {
                repo: "acme/symbols/core",
                symbol: "sym",
            }),
        );
    }

    #[test]
    fn post_routes() {
        assert_eq!(
            parse_post("acme/core/upload"),
            Some(PostRoute::Upload("acme/core")),
        );
        assert_eq!(
            parse_post("acme/core/upload/delta"),
            Some(PostRoute::UploadDelta("acme/core")),
        );
        assert_eq!(
            parse_post("acme/core/symbols:batchGet"),
            Some(PostRoute::BatchGet("acme/core")),
        );
    }

    #[test]
    fn unknown_shapes_are_rejected() {
        assert_eq!(parse_get("acme/core"), None);
        assert_eq!(parse_get("/symbols"), None);
        assert_eq!(parse_get("acme/core/symbols/"), None);
        assert_eq!(parse_post("acme/core"), None);
        assert_eq!(parse_post("/upload"), None);
    }
}
