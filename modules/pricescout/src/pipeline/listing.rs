//! Listing extraction from a rendered shopping results page.
//!
//! The result markup is unstable: class names are obfuscated and the card
//! layout has changed between page revisions. Nothing here keys on class
//! names. Each strategy anchors on something semantic instead (an
//! accessibility label, a `title` attribute, currency text) and walks the
//! tree from there. Extraction is best-effort: a card that does not fit the
//! expected shape is skipped, never an error.
//!
//! Two strategies, tried in order when [`ExtractionStrategy::Auto`]:
//! - [`AriaLabelStrategy`]: elements whose `aria-label` starts with
//!   "Current price"; the product name is the nearest `title` found walking
//!   up a few ancestors, never past the card that owns the price.
//! - [`TitledContainerStrategy`]: `div[title]` cards that contain an image;
//!   the price is the first `R$ …` text inside.

use std::collections::HashSet;
use std::sync::LazyLock;

use pricescout_common::{Candidate, Config, ExtractionStrategy, PriceEncoding, QuantitySpec};
use regex::Regex;
use rust_decimal::Decimal;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

/// Price elements the aria-label strategy anchors on.
pub const ARIA_PRICE_SELECTOR: &str = r#"[aria-label^="Current price"]"#;

/// How far above a price element to look for the product title.
const MAX_TITLE_ANCESTOR_DEPTH: usize = 4;

static CURRENCY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"R\$\s?\d[\d.,]*").expect("valid currency regex"));

/// A card as found on the page, before any parsing.
#[derive(Debug, Clone, PartialEq)]
pub struct RawListing {
    pub name: String,
    pub price_text: String,
    pub href: Option<String>,
}

pub trait ListingStrategy {
    fn name(&self) -> &'static str;
    fn listings(&self, document: &Html) -> Vec<RawListing>;
}

// ---------------------------------------------------------------------------
// Aria-label strategy
// ---------------------------------------------------------------------------

pub struct AriaLabelStrategy {
    price: Selector,
    titled: Selector,
    anchor: Selector,
}

impl AriaLabelStrategy {
    pub fn new() -> Self {
        Self {
            price: Selector::parse(ARIA_PRICE_SELECTOR).expect("valid price selector"),
            titled: Selector::parse("div[title]").expect("valid title selector"),
            anchor: Selector::parse("a[href]").expect("valid anchor selector"),
        }
    }

    /// Walk up from the price element until an ancestor either carries a
    /// title itself or contains a titled `div`. The walk stops at the first
    /// ancestor holding a second price, which is the results wrapper rather
    /// than this card.
    fn find_title<'a>(&self, price: ElementRef<'a>) -> Option<(String, ElementRef<'a>)> {
        price
            .ancestors()
            .filter_map(ElementRef::wrap)
            .take(MAX_TITLE_ANCESTOR_DEPTH)
            .take_while(|ancestor| ancestor.select(&self.price).nth(1).is_none())
            .find_map(|ancestor| {
                title_of(ancestor)
                    .or_else(|| ancestor.select(&self.titled).find_map(title_of))
                    .map(|title| (title, ancestor))
            })
    }
}

impl Default for AriaLabelStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl ListingStrategy for AriaLabelStrategy {
    fn name(&self) -> &'static str {
        "aria-label"
    }

    fn listings(&self, document: &Html) -> Vec<RawListing> {
        let mut listings = Vec::new();

        for price in document.select(&self.price) {
            let Some(label) = price.value().attr("aria-label") else {
                continue;
            };
            let Some((name, container)) = self.find_title(price) else {
                debug!(label, "Price element without a titled ancestor");
                continue;
            };
            let href = enclosing_href(price).or_else(|| first_href(container, &self.anchor));

            listings.push(RawListing {
                name,
                price_text: label.to_string(),
                href,
            });
        }

        listings
    }
}

// ---------------------------------------------------------------------------
// Titled-container strategy
// ---------------------------------------------------------------------------

pub struct TitledContainerStrategy {
    container: Selector,
    image: Selector,
    text: Selector,
    anchor: Selector,
}

impl TitledContainerStrategy {
    pub fn new() -> Self {
        Self {
            container: Selector::parse("div[title]").expect("valid container selector"),
            image: Selector::parse("img").expect("valid image selector"),
            text: Selector::parse("span, div").expect("valid text selector"),
            anchor: Selector::parse("a[href]").expect("valid anchor selector"),
        }
    }

    fn price_text(&self, container: ElementRef<'_>) -> Option<String> {
        container.select(&self.text).find_map(|el| {
            let text: String = el.text().collect();
            CURRENCY_RE.find(&text).map(|m| m.as_str().to_string())
        })
    }
}

impl Default for TitledContainerStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl ListingStrategy for TitledContainerStrategy {
    fn name(&self) -> &'static str {
        "titled-container"
    }

    fn listings(&self, document: &Html) -> Vec<RawListing> {
        let mut listings = Vec::new();

        for container in document.select(&self.container) {
            let Some(name) = title_of(container) else {
                continue;
            };
            if container.select(&self.image).next().is_none() {
                continue;
            }
            let Some(price_text) = self.price_text(container) else {
                debug!(name = name.as_str(), "Titled container without currency text");
                continue;
            };
            let href = enclosing_href(container).or_else(|| first_href(container, &self.anchor));

            listings.push(RawListing {
                name,
                price_text,
                href,
            });
        }

        listings
    }
}

// ---------------------------------------------------------------------------
// Extractor
// ---------------------------------------------------------------------------

/// Candidates from one page plus what it took to get them.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub candidates: Vec<Candidate>,
    /// Strategy that produced listings, if any did.
    pub strategy: Option<&'static str>,
    /// Listings dropped for an unparseable price or quantity.
    pub dropped: usize,
    /// Listings collapsed as exact duplicates.
    pub duplicates: usize,
}

pub struct ListingExtractor {
    strategy: ExtractionStrategy,
    encoding: PriceEncoding,
    link_base: Option<Url>,
    aria: AriaLabelStrategy,
    titled: TitledContainerStrategy,
}

impl ListingExtractor {
    pub fn new(strategy: ExtractionStrategy, encoding: PriceEncoding, link_base: &str) -> Self {
        Self {
            strategy,
            encoding,
            link_base: Url::parse(link_base).ok(),
            aria: AriaLabelStrategy::new(),
            titled: TitledContainerStrategy::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.extraction_strategy,
            config.price_encoding,
            &config.link_base_url,
        )
    }

    /// What the render waits for. Always `body`: a challenge redirect has to
    /// come back as a page so its URL can be checked, and a challenge page
    /// never shows price elements.
    pub fn ready_selector(&self) -> &'static str {
        "body"
    }

    /// Whether a rendered, non-challenge page has what this mode insists
    /// on. Only the aria-label-only mode requires its price elements; a page
    /// without them counts as a load that never finished.
    pub fn page_ready(&self, html: &str) -> bool {
        match self.strategy {
            ExtractionStrategy::AriaLabel => Html::parse_document(html)
                .select(&self.aria.price)
                .next()
                .is_some(),
            ExtractionStrategy::TitledContainer | ExtractionStrategy::Auto => true,
        }
    }

    fn strategies(&self) -> Vec<&dyn ListingStrategy> {
        let aria: &dyn ListingStrategy = &self.aria;
        let titled: &dyn ListingStrategy = &self.titled;
        match self.strategy {
            ExtractionStrategy::AriaLabel => vec![aria],
            ExtractionStrategy::TitledContainer => vec![titled],
            ExtractionStrategy::Auto => vec![aria, titled],
        }
    }

    /// Extract candidates for `query` from rendered HTML. The first strategy
    /// that finds any listing wins; later ones are not consulted.
    pub fn extract(&self, html: &str, query: &str) -> Extraction {
        let document = Html::parse_document(html);

        for strategy in self.strategies() {
            let raw = strategy.listings(&document);
            debug!(strategy = strategy.name(), listings = raw.len(), "Strategy attempted");
            if raw.is_empty() {
                continue;
            }
            let mut extraction = self.to_candidates(raw, query);
            extraction.strategy = Some(strategy.name());
            return extraction;
        }

        Extraction::default()
    }

    fn to_candidates(&self, raw: Vec<RawListing>, query: &str) -> Extraction {
        let mut extraction = Extraction::default();
        let mut seen: HashSet<(String, Decimal, Option<String>)> = HashSet::new();

        for listing in raw {
            let price = match self.encoding.parse(&listing.price_text) {
                Ok(p) => p,
                Err(e) => {
                    debug!(name = listing.name.as_str(), text = listing.price_text.as_str(), error = %e, "Dropping listing");
                    extraction.dropped += 1;
                    continue;
                }
            };
            let quantity = match QuantitySpec::extract(&listing.name) {
                Ok(q) => q,
                Err(e) => {
                    debug!(name = listing.name.as_str(), error = %e, "Dropping listing");
                    extraction.dropped += 1;
                    continue;
                }
            };
            let link = listing.href.as_deref().and_then(|h| self.resolve_link(h));

            if !seen.insert((listing.name.clone(), price, link.clone())) {
                extraction.duplicates += 1;
                continue;
            }

            extraction.candidates.push(Candidate {
                name: listing.name,
                price,
                link,
                source_query: query.to_string(),
                quantity,
            });
        }

        extraction
    }

    /// Absolute links are kept verbatim; relative ones are joined onto the
    /// configured base. Script/fragment links are dropped.
    pub fn resolve_link(&self, href: &str) -> Option<String> {
        let href = href.trim();
        if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
            return None;
        }
        if Url::parse(href).is_ok() {
            return Some(href.to_string());
        }
        match &self.link_base {
            Some(base) => base.join(href).ok().map(String::from),
            None => Some(href.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tree helpers
// ---------------------------------------------------------------------------

fn title_of(el: ElementRef<'_>) -> Option<String> {
    el.value()
        .attr("title")
        .map(collapse_whitespace)
        .filter(|t| !t.is_empty())
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `href` of the closest enclosing `<a>`.
fn enclosing_href(el: ElementRef<'_>) -> Option<String> {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .filter(|a| a.value().name() == "a")
        .find_map(|a| a.value().attr("href"))
        .map(String::from)
}

fn first_href(scope: ElementRef<'_>, anchor: &Selector) -> Option<String> {
    scope
        .select(anchor)
        .find_map(|a| a.value().attr("href"))
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARIA_PAGE: &str = r#"
        <html><body><div id="results">
          <a href="/shopping/product/1?q=whey">
            <div class="c1">
              <div class="t" title="Whey Protein Concentrado   1kg">Whey Protein…</div>
              <div class="p"><div aria-label="Current price: R$ 129,90">R$ 129,90</div></div>
            </div>
          </a>
          <div class="c1">
            <div title="Whey Protein Isolado 900g"></div>
            <div class="p"><div aria-label="Current price: R$ 199,00"></div></div>
            <a href="https://loja.example.com/whey-isolado">Ver loja</a>
          </div>
        </div></body></html>
    "#;

    const CONTAINER_PAGE: &str = r#"
        <html><body>
          <div title="Creatina Monohidratada 300g">
            <img src="a.png">
            <span>Creatina Monohidratada 300g</span>
            <span>R$ <b>89,90</b></span>
            <a href="/url?q=https://loja.example.com/creatina">loja</a>
          </div>
          <div title="Sem imagem 300g"><span>R$ 10,00</span></div>
          <div title="Sem preço 300g"><img src="b.png"><span>Esgotado</span></div>
        </body></html>
    "#;

    fn extractor(strategy: ExtractionStrategy, encoding: PriceEncoding) -> ListingExtractor {
        ListingExtractor::new(strategy, encoding, "https://www.google.com")
    }

    #[test]
    fn aria_strategy_finds_title_on_ancestor() {
        let doc = Html::parse_document(ARIA_PAGE);
        let listings = AriaLabelStrategy::new().listings(&doc);

        assert_eq!(listings.len(), 2);
        assert_eq!(listings[0].name, "Whey Protein Concentrado 1kg");
        assert_eq!(listings[0].price_text, "Current price: R$ 129,90");
        assert_eq!(listings[0].href.as_deref(), Some("/shopping/product/1?q=whey"));

        assert_eq!(listings[1].name, "Whey Protein Isolado 900g");
        assert_eq!(listings[1].href.as_deref(), Some("https://loja.example.com/whey-isolado"));
    }

    #[test]
    fn aria_price_without_title_is_skipped() {
        let doc = Html::parse_document(
            r#"<html><body><div><div aria-label="Current price: R$ 10,00"></div></div></body></html>"#,
        );
        assert!(AriaLabelStrategy::new().listings(&doc).is_empty());
    }

    #[test]
    fn untitled_card_does_not_borrow_a_neighbours_title() {
        let doc = Html::parse_document(
            r#"<html><body><div id="rso">
                 <a href="/p/1"><div class="card"><div title="Whey Protein 1kg"></div>
                   <div class="row"><span aria-label="Current price: R$ 10,00"></span></div></div></a>
                 <a href="/p/2"><div class="card">
                   <div class="row"><span aria-label="Current price: R$ 99,00"></span></div></div></a>
               </div></body></html>"#,
        );
        let listings = AriaLabelStrategy::new().listings(&doc);

        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].name, "Whey Protein 1kg");
        assert_eq!(listings[0].price_text, "Current price: R$ 10,00");
        assert_eq!(listings[0].href.as_deref(), Some("/p/1"));
    }

    #[test]
    fn container_strategy_requires_image_and_currency() {
        let doc = Html::parse_document(CONTAINER_PAGE);
        let listings = TitledContainerStrategy::new().listings(&doc);

        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].name, "Creatina Monohidratada 300g");
        assert_eq!(listings[0].price_text, "R$ 89,90");
        assert_eq!(
            listings[0].href.as_deref(),
            Some("/url?q=https://loja.example.com/creatina")
        );
    }

    #[test]
    fn aria_strategy_ignores_container_layout() {
        let doc = Html::parse_document(CONTAINER_PAGE);
        assert!(AriaLabelStrategy::new().listings(&doc).is_empty());
    }

    #[test]
    fn extract_builds_candidates_in_cents_mode() {
        let ex = extractor(ExtractionStrategy::AriaLabel, PriceEncoding::IntegerCents);
        let result = ex.extract(ARIA_PAGE, "whey protein 1kg");

        assert_eq!(result.strategy, Some("aria-label"));
        assert_eq!(result.candidates.len(), 2);

        let first = &result.candidates[0];
        assert_eq!(first.price, Decimal::new(12990, 2));
        assert_eq!(
            first.link.as_deref(),
            Some("https://www.google.com/shopping/product/1?q=whey")
        );
        assert_eq!(first.source_query, "whey protein 1kg");
        assert_eq!(first.quantity.to_string(), "1000g");
    }

    #[test]
    fn auto_falls_back_to_container_strategy() {
        let ex = extractor(ExtractionStrategy::Auto, PriceEncoding::DecimalComma);
        let result = ex.extract(CONTAINER_PAGE, "creatina 300g");

        assert_eq!(result.strategy, Some("titled-container"));
        assert_eq!(result.candidates.len(), 1);
        assert_eq!(result.candidates[0].price, Decimal::new(8990, 2));
        assert_eq!(
            result.candidates[0].link.as_deref(),
            Some("https://www.google.com/url?q=https://loja.example.com/creatina")
        );
    }

    #[test]
    fn auto_prefers_aria_when_it_finds_listings() {
        let ex = extractor(ExtractionStrategy::Auto, PriceEncoding::IntegerCents);
        assert_eq!(ex.extract(ARIA_PAGE, "whey").strategy, Some("aria-label"));
    }

    #[test]
    fn empty_page_yields_nothing() {
        let ex = extractor(ExtractionStrategy::Auto, PriceEncoding::IntegerCents);
        let result = ex.extract("<html><body><p>Nenhum resultado</p></body></html>", "x");
        assert!(result.candidates.is_empty());
        assert_eq!(result.strategy, None);
    }

    #[test]
    fn unparseable_listings_are_dropped_not_fatal() {
        let html = r#"
            <div><div title="Mel 1.000,5kg"></div><div aria-label="Current price: R$ 30,00"></div></div>
            <div><div title="Mel 500g"></div><div aria-label="Current price: indisponível"></div></div>
            <div><div title="Mel 500g"></div><div aria-label="Current price: R$ 25,00"></div></div>
        "#;
        let ex = extractor(ExtractionStrategy::AriaLabel, PriceEncoding::DecimalComma);
        let result = ex.extract(html, "mel 500g");

        assert_eq!(result.dropped, 2);
        assert_eq!(result.candidates.len(), 1);
        assert_eq!(result.candidates[0].price, Decimal::new(2500, 2));
    }

    #[test]
    fn oversized_quantity_drops_only_that_listing() {
        let html = r#"
            <div><div title="Mega 99999999999999999999999999kg"></div><div aria-label="Current price: R$ 30,00"></div></div>
            <div><div title="Mel 500g"></div><div aria-label="Current price: R$ 25,00"></div></div>
        "#;
        let ex = extractor(ExtractionStrategy::AriaLabel, PriceEncoding::DecimalComma);
        let result = ex.extract(html, "mel 500g");

        assert_eq!(result.dropped, 1);
        assert_eq!(result.candidates.len(), 1);
        assert_eq!(result.candidates[0].name, "Mel 500g");
    }

    #[test]
    fn exact_duplicates_collapse() {
        let card = r#"<a href="/p/1"><div><div title="Mel 500g"></div><div aria-label="Current price: R$ 25,00"></div></div></a>"#;
        let html = format!("<body>{card}{card}</body>");
        let ex = extractor(ExtractionStrategy::AriaLabel, PriceEncoding::DecimalComma);
        let result = ex.extract(&html, "mel 500g");

        assert_eq!(result.candidates.len(), 1);
        assert_eq!(result.duplicates, 1);
    }

    #[test]
    fn link_resolution() {
        let ex = extractor(ExtractionStrategy::Auto, PriceEncoding::IntegerCents);
        assert_eq!(
            ex.resolve_link("/shopping/product/9").as_deref(),
            Some("https://www.google.com/shopping/product/9")
        );
        assert_eq!(
            ex.resolve_link("https://loja.example.com/p?id=1").as_deref(),
            Some("https://loja.example.com/p?id=1")
        );
        assert_eq!(ex.resolve_link("javascript:void(0)"), None);
        assert_eq!(ex.resolve_link("#"), None);
    }

    #[test]
    fn ready_selector_is_body_in_every_mode() {
        for strategy in [
            ExtractionStrategy::AriaLabel,
            ExtractionStrategy::TitledContainer,
            ExtractionStrategy::Auto,
        ] {
            assert_eq!(extractor(strategy, PriceEncoding::IntegerCents).ready_selector(), "body");
        }
    }

    #[test]
    fn aria_only_mode_requires_price_elements() {
        let aria = extractor(ExtractionStrategy::AriaLabel, PriceEncoding::IntegerCents);
        assert!(aria.page_ready(ARIA_PAGE));
        assert!(!aria.page_ready(CONTAINER_PAGE));

        let auto = extractor(ExtractionStrategy::Auto, PriceEncoding::IntegerCents);
        assert!(auto.page_ready(CONTAINER_PAGE));
    }
}
