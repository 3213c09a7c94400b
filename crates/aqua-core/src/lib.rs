//! Core domain model for Aqua: search filters, query composition, worker
//! profiles and the booking/identity wire shapes.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const PRICE_FLOOR: u32 = 0;
pub const PRICE_CEILING: u32 = 100;

/// Booking category used when no skill filter is active.
pub const DEFAULT_CATEGORY: &str = "other";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("unknown skill {0:?}")]
    UnknownSkill(String),
    #[error("unknown education level {0:?}")]
    UnknownEducation(String),
    #[error("unsupported minimum rating {0:?}; expected 3, 4 or 4.5")]
    UnsupportedRating(String),
    #[error("unsupported experience {0:?}; expected 1, 3, 5 or 10 years")]
    UnsupportedExperience(String),
    #[error("price {0} is outside {floor}..={ceiling}", floor = PRICE_FLOOR, ceiling = PRICE_CEILING)]
    PriceOutOfRange(u32),
}

/// `""` and `"any"` both mean "no constraint" for select-style filters.
fn is_unset_sentinel(raw: &str) -> bool {
    let trimmed = raw.trim();
    trimmed.is_empty() || trimmed.eq_ignore_ascii_case("any")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Skill {
    Carpentry,
    Plumbing,
    Electrical,
    Painting,
    Cleaning,
    Gardening,
    Furniture,
}

impl Skill {
    pub const ALL: [Skill; 7] = [
        Skill::Carpentry,
        Skill::Plumbing,
        Skill::Electrical,
        Skill::Painting,
        Skill::Cleaning,
        Skill::Gardening,
        Skill::Furniture,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Skill::Carpentry => "carpentry",
            Skill::Plumbing => "plumbing",
            Skill::Electrical => "electrical",
            Skill::Painting => "painting",
            Skill::Cleaning => "cleaning",
            Skill::Gardening => "gardening",
            Skill::Furniture => "furniture",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Skill::Carpentry => "Carpentry",
            Skill::Plumbing => "Plumbing",
            Skill::Electrical => "Electrical",
            Skill::Painting => "Painting",
            Skill::Cleaning => "Cleaning",
            Skill::Gardening => "Gardening",
            Skill::Furniture => "Furniture",
        }
    }

    /// Parses a select value, mapping the unset sentinels to `None`.
    pub fn parse_filter(raw: &str) -> Result<Option<Self>, FilterError> {
        if is_unset_sentinel(raw) {
            return Ok(None);
        }
        raw.parse().map(Some)
    }
}

impl FromStr for Skill {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|skill| skill.as_str() == needle)
            .ok_or_else(|| FilterError::UnknownSkill(s.to_string()))
    }
}

impl fmt::Display for Skill {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EducationLevel {
    HighSchool,
    Associate,
    Bachelor,
    Master,
    Phd,
    Vocational,
    Certification,
}

impl EducationLevel {
    pub const ALL: [EducationLevel; 7] = [
        EducationLevel::HighSchool,
        EducationLevel::Associate,
        EducationLevel::Bachelor,
        EducationLevel::Master,
        EducationLevel::Phd,
        EducationLevel::Vocational,
        EducationLevel::Certification,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EducationLevel::HighSchool => "high_school",
            EducationLevel::Associate => "associate",
            EducationLevel::Bachelor => "bachelor",
            EducationLevel::Master => "master",
            EducationLevel::Phd => "phd",
            EducationLevel::Vocational => "vocational",
            EducationLevel::Certification => "certification",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            EducationLevel::HighSchool => "High School",
            EducationLevel::Associate => "Associate Degree",
            EducationLevel::Bachelor => "Bachelor's Degree",
            EducationLevel::Master => "Master's Degree",
            EducationLevel::Phd => "PhD",
            EducationLevel::Vocational => "Vocational Training",
            EducationLevel::Certification => "Professional Certification",
        }
    }

    pub fn parse_filter(raw: &str) -> Result<Option<Self>, FilterError> {
        if is_unset_sentinel(raw) {
            return Ok(None);
        }
        raw.parse().map(Some)
    }
}

impl FromStr for EducationLevel {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        Self::ALL
            .into_iter()
            .find(|level| level.as_str() == needle)
            .ok_or_else(|| FilterError::UnknownEducation(s.to_string()))
    }
}

impl fmt::Display for EducationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Minimum star rating a worker must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MinRating {
    Three,
    Four,
    FourAndHalf,
}

impl MinRating {
    pub fn as_str(self) -> &'static str {
        match self {
            MinRating::Three => "3",
            MinRating::Four => "4",
            MinRating::FourAndHalf => "4.5",
        }
    }

    pub fn stars(self) -> f64 {
        match self {
            MinRating::Three => 3.0,
            MinRating::Four => 4.0,
            MinRating::FourAndHalf => 4.5,
        }
    }

    pub fn parse_filter(raw: &str) -> Result<Option<Self>, FilterError> {
        if is_unset_sentinel(raw) {
            return Ok(None);
        }
        raw.parse().map(Some)
    }
}

impl FromStr for MinRating {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "3" | "3.0" => Ok(MinRating::Three),
            "4" | "4.0" => Ok(MinRating::Four),
            "4.5" => Ok(MinRating::FourAndHalf),
            _ => Err(FilterError::UnsupportedRating(s.to_string())),
        }
    }
}

impl fmt::Display for MinRating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Minimum years of experience bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExperienceYears {
    One,
    Three,
    Five,
    Ten,
}

impl ExperienceYears {
    pub fn years(self) -> u32 {
        match self {
            ExperienceYears::One => 1,
            ExperienceYears::Three => 3,
            ExperienceYears::Five => 5,
            ExperienceYears::Ten => 10,
        }
    }

    /// Like the other select filters, but `"0"` ("any experience") is also unset.
    pub fn parse_filter(raw: &str) -> Result<Option<Self>, FilterError> {
        if is_unset_sentinel(raw) || raw.trim() == "0" {
            return Ok(None);
        }
        raw.parse().map(Some)
    }
}

impl FromStr for ExperienceYears {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1" => Ok(ExperienceYears::One),
            "3" => Ok(ExperienceYears::Three),
            "5" => Ok(ExperienceYears::Five),
            "10" => Ok(ExperienceYears::Ten),
            _ => Err(FilterError::UnsupportedExperience(s.to_string())),
        }
    }
}

impl fmt::Display for ExperienceYears {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.years())
    }
}

/// Hourly rate window. Always satisfies `PRICE_FLOOR <= min <= max <= PRICE_CEILING`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PriceRange {
    min: u32,
    max: u32,
}

impl PriceRange {
    pub const FULL: PriceRange = PriceRange {
        min: PRICE_FLOOR,
        max: PRICE_CEILING,
    };

    pub fn min(&self) -> u32 {
        self.min
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    pub fn is_full(&self) -> bool {
        *self == Self::FULL
    }
}

impl Default for PriceRange {
    fn default() -> Self {
        Self::FULL
    }
}

fn check_price(value: u32) -> Result<u32, FilterError> {
    if value > PRICE_CEILING {
        return Err(FilterError::PriceOutOfRange(value));
    }
    Ok(value)
}

/// Client-held search constraints, edited field by field before a search is
/// triggered.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FilterCriteria {
    free_text: String,
    skill: Option<Skill>,
    city: String,
    state: String,
    min_rating: Option<MinRating>,
    price: PriceRange,
    min_experience: Option<ExperienceYears>,
    education: Option<EducationLevel>,
}

impl FilterCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn free_text(&self) -> &str {
        &self.free_text
    }

    pub fn skill(&self) -> Option<Skill> {
        self.skill
    }

    pub fn city(&self) -> &str {
        &self.city
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    pub fn min_rating(&self) -> Option<MinRating> {
        self.min_rating
    }

    pub fn price(&self) -> PriceRange {
        self.price
    }

    pub fn min_experience(&self) -> Option<ExperienceYears> {
        self.min_experience
    }

    pub fn education(&self) -> Option<EducationLevel> {
        self.education
    }

    pub fn set_free_text(&mut self, text: impl Into<String>) {
        self.free_text = text.into();
    }

    pub fn set_skill(&mut self, skill: Option<Skill>) {
        self.skill = skill;
    }

    pub fn set_city(&mut self, city: impl Into<String>) {
        self.city = city.into();
    }

    pub fn set_state(&mut self, state: impl Into<String>) {
        self.state = state.into();
    }

    pub fn set_min_rating(&mut self, rating: Option<MinRating>) {
        self.min_rating = rating;
    }

    /// Moves the lower bound, clamped so it never passes the upper bound.
    pub fn set_price_min(&mut self, value: u32) -> Result<(), FilterError> {
        let value = check_price(value)?;
        self.price.min = value.min(self.price.max);
        Ok(())
    }

    /// Moves the upper bound, clamped so it never drops below the lower bound.
    pub fn set_price_max(&mut self, value: u32) -> Result<(), FilterError> {
        let value = check_price(value)?;
        self.price.max = value.max(self.price.min);
        Ok(())
    }

    /// Sets both bounds at once, as a two-thumb slider does. Both values are
    /// validated before either is applied.
    pub fn set_price_range(&mut self, min: u32, max: u32) -> Result<(), FilterError> {
        let min = check_price(min)?;
        let max = check_price(max)?;
        self.price = PriceRange {
            min: min.min(max),
            max,
        };
        Ok(())
    }

    pub fn set_min_experience(&mut self, experience: Option<ExperienceYears>) {
        self.min_experience = experience;
    }

    pub fn set_education(&mut self, education: Option<EducationLevel>) {
        self.education = education;
    }

    /// Resets every field to its default in one step.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    pub fn to_query(&self) -> SearchQuery {
        build_query(self)
    }

    /// Category attached to bookings made under these filters.
    pub fn booking_category(&self) -> &'static str {
        self.skill.map(Skill::as_str).unwrap_or(DEFAULT_CATEGORY)
    }
}

/// Ordered query parameters for the worker search endpoint. Equal queries
/// identify the same logical search.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SearchQuery {
    pairs: Vec<(&'static str, String)>,
}

impl SearchQuery {
    pub fn pairs(&self) -> &[(&'static str, String)] {
        &self.pairs
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }
}

/// Unencoded `key=value&...` rendering, for logs.
impl fmt::Display for SearchQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, (key, value)) in self.pairs.iter().enumerate() {
            if idx > 0 {
                f.write_str("&")?;
            }
            write!(f, "{key}={value}")?;
        }
        Ok(())
    }
}

/// Serializes filters into query pairs, omitting every field still at its
/// default. The price bounds are sent together or not at all.
pub fn build_query(criteria: &FilterCriteria) -> SearchQuery {
    let mut pairs = Vec::new();

    if !criteria.free_text.is_empty() {
        pairs.push(("query", criteria.free_text.clone()));
    }
    if let Some(skill) = criteria.skill {
        pairs.push(("skills", skill.as_str().to_string()));
    }
    if !criteria.city.is_empty() {
        pairs.push(("city", criteria.city.clone()));
    }
    if !criteria.state.is_empty() {
        pairs.push(("state", criteria.state.clone()));
    }
    if let Some(rating) = criteria.min_rating {
        pairs.push(("rating", rating.as_str().to_string()));
    }
    if !criteria.price.is_full() {
        pairs.push(("minPrice", criteria.price.min.to_string()));
        pairs.push(("maxPrice", criteria.price.max.to_string()));
    }
    if let Some(experience) = criteria.min_experience {
        pairs.push(("experience", experience.years().to_string()));
    }
    if let Some(education) = criteria.education {
        pairs.push(("education", education.as_str().to_string()));
    }

    SearchQuery { pairs }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for WorkerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WorkerAddress {
    pub city: Option<String>,
    pub state: Option<String>,
}

/// Server-provided worker record as returned by the search endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerProfile {
    #[serde(rename = "_id")]
    pub id: WorkerId,
    pub name: String,
    #[serde(default)]
    pub rating: f64,
    #[serde(default)]
    pub rating_count: u32,
    pub address: Option<WorkerAddress>,
    #[serde(default)]
    pub skills: BTreeSet<String>,
    pub hourly_rate: Option<f64>,
    pub years_of_experience: Option<u32>,
    #[serde(alias = "education")]
    pub education_level: Option<String>,
    pub phone: Option<String>,
    pub broker_id: Option<String>,
}

impl WorkerProfile {
    pub fn is_broker_managed(&self) -> bool {
        self.broker_id.is_some()
    }

    /// Direct phone number, withheld for broker-managed workers.
    pub fn contact_phone(&self) -> Option<&str> {
        if self.is_broker_managed() {
            return None;
        }
        self.phone.as_deref().filter(|p| !p.is_empty())
    }

    pub fn location_label(&self) -> Option<String> {
        let address = self.address.as_ref()?;
        let parts = [address.city.as_deref(), address.state.as_deref()]
            .into_iter()
            .flatten()
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(", "))
        }
    }

    pub fn experience_label(&self) -> Option<String> {
        match self.years_of_experience? {
            0 => None,
            1 => Some("1 year".to_string()),
            n => Some(format!("{n} years")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BookingLocation {
    pub address: String,
    pub city: String,
    pub state: String,
}

/// JSON body of `POST /api/orders`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    pub worker_id: WorkerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broker_id: Option<String>,
    pub title: String,
    pub description: String,
    pub category: String,
    pub location: BookingLocation,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAddress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub street: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zip_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

/// Authenticated user record owned by the identity store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub address: UserAddress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skills: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broker_id: Option<String>,
    pub token: String,
}
