//! Extraction of [`Doctor`]s from a rendered "find a doctor" results page.
//!
//! Every provider is rendered as a `div.list-item-content` card using
//! schema.org microdata (`itemprop` attributes).

use reqwest::Url;
use scraper::{ElementRef, Html, Selector};

use crate::{doctor::Doctor, Error};

/// Doctors found on one results page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Listing {
    pub doctors: Vec<Doctor>,
    /// Absolute url of the following results page, if any.
    pub next_page: Option<String>,
}

struct Selectors {
    card: Selector,
    name: Selector,
    profile_link: Selector,
    specialty: Selector,
    image: Selector,
    other_locations: Selector,
    facility: Selector,
    street_address: Selector,
    phone: Selector,
    badge: Selector,
    rating: Selector,
    rating_value: Selector,
    rating_count: Selector,
    next_page: Selector,
}

fn selector(css: &str) -> Result<Selector, Error> {
    Selector::parse(css).map_err(|err| Error::Internal(format!("invalid selector '{css}': {err:?}")))
}

impl Selectors {
    fn new() -> Result<Self, Error> {
        Ok(Self {
            card: selector("div.list-item-content")?,
            name: selector("span[itemprop='name'], a span.link_provider_display_name")?,
            profile_link: selector("a[href*='/provider']")?,
            specialty: selector("span[itemprop='medicalSpecialty']")?,
            image: selector("div.provider-image img")?,
            other_locations: selector("a[data-testref='provider-cards-location']")?,
            facility: selector("span[itemprop='name'][color='gray_800']")?,
            street_address: selector("span[itemprop='streetAddress']")?,
            phone: selector("a[href^='tel:']")?,
            badge: selector("div[class*='styles__Badge'] span")?,
            rating: selector("div.loyal-stars[itemprop='aggregateRating']")?,
            rating_value: selector("span[itemprop='ratingValue']")?,
            rating_count: selector("span[itemprop='ratingCount']")?,
            next_page: selector("a[rel='next']")?,
        })
    }
}

pub struct CardParser {
    base_url: Url,
    selectors: Selectors,
}

impl CardParser {
    /// `base_url` is what relative profile links are resolved against.
    pub fn new(base_url: &str) -> Result<Self, Error> {
        let base_url = Url::parse(base_url)
            .map_err(|err| Error::Internal(format!("invalid base url '{base_url}': {err}")))?;
        Ok(Self {
            base_url,
            selectors: Selectors::new()?,
        })
    }

    pub fn parse(&self, html: &str, page_url: &Url) -> Listing {
        let document = Html::parse_document(html);

        let mut doctors: Vec<Doctor> = Vec::new();
        for card in document.select(&self.selectors.card) {
            match self.parse_card(card) {
                Ok(doctor) => {
                    if doctors.iter().any(|seen| seen.name == doctor.name) {
                        tracing::debug!("skipping duplicate doctor '{}'", doctor.name);
                    } else {
                        doctors.push(doctor);
                    }
                }
                Err(err) => tracing::error!("Error extracting doctor info: {}", err),
            }
        }

        let link_base = match page_url.scheme() {
            "http" | "https" => page_url,
            _ => &self.base_url,
        };
        let next_page = document
            .select(&self.selectors.next_page)
            .find_map(|link| link.value().attr("href"))
            .and_then(|href| link_base.join(href).ok())
            .filter(|url| matches!(url.scheme(), "http" | "https"))
            .map(String::from);

        Listing { doctors, next_page }
    }

    fn parse_card(&self, card: ElementRef<'_>) -> Result<Doctor, Error> {
        let s = &self.selectors;

        let name = first(card, &s.name)
            .map(text)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| Error::UnexpectedHtml("card has no provider name".into()))?;

        let href = first(card, &s.profile_link)
            .and_then(|link| link.value().attr("href"))
            .ok_or_else(|| Error::UnexpectedHtml(format!("'{name}' has no profile link")))?;
        let profile_url = self
            .base_url
            .join(href)
            .map_err(|err| Error::UnexpectedHtml(format!("bad profile link '{href}': {err}")))?;

        let specialty = first(card, &s.specialty)
            .map(text)
            .ok_or_else(|| Error::UnexpectedHtml(format!("'{name}' has no specialty")))?;

        let image_url = first(card, &s.image)
            .and_then(|img| img.value().attr("src"))
            .map(String::from);

        let has_multiple_locations = card
            .select(&s.other_locations)
            .any(|link| mentions_other_locations(&text(link)));

        let facility = first(card, &s.facility).map(text).filter(|t| !t.is_empty());
        let street = first(card, &s.street_address).map(text).filter(|t| !t.is_empty());
        let location = match (facility, street) {
            (Some(facility), Some(street)) => Some(format!("{facility}: {street}")),
            (facility, street) => street.or(facility),
        };

        let phone = first(card, &s.phone)
            .and_then(|link| link.value().attr("href"))
            .and_then(|href| href.strip_prefix("tel:"))
            .map(|number| number.trim().to_owned())
            .filter(|number| !number.is_empty());

        let mut is_employed_provider = false;
        let mut is_accepting_new_patients = false;
        for badge in card.select(&s.badge) {
            let badge = text(badge);
            is_employed_provider |= badge.contains("Employed Provider");
            is_accepting_new_patients |= badge.contains("Accepts New Patients");
        }

        let (rating, rating_count) = match first(card, &s.rating) {
            Some(stars) => (
                first(stars, &s.rating_value).and_then(|value| parse_rating(&text(value))),
                first(stars, &s.rating_count).and_then(|count| parse_rating_count(&text(count))),
            ),
            None => (None, None),
        };

        Ok(Doctor {
            name,
            specialty: Some(specialty).filter(|t| !t.is_empty()),
            profile_url: Some(profile_url.into()),
            image_url,
            location,
            phone,
            has_multiple_locations,
            is_employed_provider,
            is_accepting_new_patients,
            rating,
            rating_count,
        })
    }
}

fn first<'a>(element: ElementRef<'a>, selector: &Selector) -> Option<ElementRef<'a>> {
    element.select(selector).next()
}

/// Element text with whitespace runs collapsed.
fn text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// `"4.8 / 5"` -> `4.8`
fn parse_rating(text: &str) -> Option<f64> {
    text.split('/').next()?.trim().parse().ok()
}

/// `"(194)"` -> `194`
fn parse_rating_count(text: &str) -> Option<i32> {
    text.trim().trim_matches(|c: char| c == '(' || c == ')').trim().parse().ok()
}

/// Matches `+N other location` / `+N other locations` with `N >= 1`.
fn mentions_other_locations(text: &str) -> bool {
    text.match_indices('+').any(|(at, _)| {
        let rest = &text[at + 1..];
        let digits = rest.len() - rest.trim_start_matches(|c: char| c.is_ascii_digit()).len();
        digits > 0
            && rest[..digits].parse::<u32>().map_or(false, |n| n >= 1)
            && rest[digits..].starts_with(" other location")
    })
}
