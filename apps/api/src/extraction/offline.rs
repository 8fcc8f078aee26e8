//! Offline heuristic extraction.
//!
//! Pattern and keyword rules that turn plain resume text into a sparse
//! `ResumeRecord` without calling any model. This is the last strategy in the
//! extraction chain, so it never fails: anything it cannot recognise is left
//! at its default.

use std::collections::HashSet;

use lazy_static::lazy_static;
use regex::Regex;

use crate::models::resume::{Contact, Education, Experience, Project, ResumeRecord};

const NAME_SCAN_LINES: usize = 5;
const MAX_EDUCATION: usize = 3;
const MAX_EXPERIENCE: usize = 5;
const MAX_CERTIFICATIONS: usize = 10;
const MAX_SKILL_ITEM_CHARS: usize = 40;

/// Keywords detected anywhere in the text, with their display form.
const SKILL_KEYWORDS: &[(&str, &str)] = &[
    ("python", "Python"),
    ("java", "Java"),
    ("javascript", "JavaScript"),
    ("typescript", "TypeScript"),
    ("react", "React"),
    ("node.js", "Node.js"),
    ("sql", "SQL"),
    ("html", "HTML"),
    ("css", "CSS"),
    ("machine learning", "Machine Learning"),
    ("data science", "Data Science"),
    ("aws", "AWS"),
    ("docker", "Docker"),
    ("kubernetes", "Kubernetes"),
    ("git", "Git"),
    ("github", "GitHub"),
    ("agile", "Agile"),
    ("scrum", "Scrum"),
    ("tensorflow", "TensorFlow"),
    ("pytorch", "PyTorch"),
    ("excel", "Excel"),
    ("powerbi", "Power BI"),
    ("tableau", "Tableau"),
    ("mongodb", "MongoDB"),
    ("postgresql", "PostgreSQL"),
    ("rust", "Rust"),
];

const EDUCATION_KEYWORDS: &[&str] = &[
    "university",
    "college",
    "institute",
    "school",
    "bachelor",
    "master",
    "phd",
    "ph.d",
    "degree",
    "diploma",
];

const INSTITUTION_KEYWORDS: &[&str] = &["university", "college", "institute", "school", "academy"];

const NAME_STOPWORDS: &[&str] = &["resume", "cv", "curriculum", "phone", "email"];

const BULLETS: &[char] = &['-', '•', '*', '▪', '◦', '·', '–'];

lazy_static! {
    static ref EMAIL_RE: Regex =
        Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap();
    static ref PHONE_RE: Regex =
        Regex::new(r"(\+?1?[-.\s]?)?\(?([0-9]{3})\)?[-.\s]?([0-9]{3})[-.\s]?([0-9]{4})").unwrap();
    static ref PHONE_IN_LINE_RE: Regex = Regex::new(r"\d{3}[-.\s]?\d{3}[-.\s]?\d{4}").unwrap();
    static ref NAME_LABEL_RE: Regex =
        Regex::new(r"(?im)^\s*(?:full\s+)?name\s*[:\-]\s*(.+?)\s*$").unwrap();
    static ref NEXT_LABEL_RE: Regex = Regex::new(r"\s[A-Za-z][A-Za-z-]*\s*:").unwrap();
    static ref ADDRESS_LABEL_RE: Regex =
        Regex::new(r"(?im)^\s*(?:address|location)\s*[:\-]\s*(.+?)\s*$").unwrap();
    static ref DATE_RANGE_RE: Regex = Regex::new(
        r"(?i)\b((?:(?:jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]{0,6}\.?\s+)?(?:19|20)\d{2})\s*(?:-|–|—|to)\s*((?:(?:jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]{0,6}\.?\s+)?(?:19|20)\d{2}|present|current|now)\b"
    )
    .unwrap();
    static ref YEAR_RE: Regex = Regex::new(r"\b(?:19|20)\d{2}\b").unwrap();
    static ref GPA_RE: Regex = Regex::new(r"(?i)\b(?:c?gpa)\s*[:\-]?\s*([0-9]\.[0-9]{1,2}(?:\s*/\s*[0-9](?:\.[0-9]+)?)?)").unwrap();
    static ref DEGREE_RE: Regex = Regex::new(
        r"(?i)\b(ph\.?\s?d\.?|doctorate|master(?:'s)?(?:\s+of\s+[a-z]+)?|bachelor(?:'s)?(?:\s+of\s+[a-z]+)?|m\.?b\.?a\b|b\.?\s?sc\b|m\.?\s?sc\b|b\.?tech\b|m\.?tech\b|b\.?s\.|m\.?s\.|b\.?a\.|m\.?a\.|associate(?:'s)?\s+degree|diploma)"
    )
    .unwrap();
    static ref FIELD_RE: Regex = Regex::new(r"\b(?:in|of)\s+([A-Z][A-Za-z&]+(?:\s+[A-Z&][A-Za-z&]*)*)").unwrap();
    static ref TECH_LABEL_RE: Regex =
        Regex::new(r"(?i)^\s*(?:technologies|tech stack|stack|tools)\s*[:\-]\s*(.+)$").unwrap();
    static ref SKILL_PATTERNS: Vec<(Regex, &'static str)> = SKILL_KEYWORDS
        .iter()
        .map(|(keyword, display)| {
            let pattern = format!(r"(?i)(?:^|[^a-z0-9]){}(?:$|[^a-z0-9])", regex::escape(keyword));
            (Regex::new(&pattern).unwrap(), *display)
        })
        .collect();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Header,
    Education,
    Experience,
    Skills,
    Projects,
    Certifications,
    Other,
}

fn section_for(line: &str) -> Option<Section> {
    let key = line
        .trim()
        .trim_matches(|c: char| c == ':' || c == '#' || c == '*' || c.is_whitespace())
        .to_lowercase();
    let section = match key.as_str() {
        "education" | "academic background" | "academics" | "education and training"
        | "qualifications" | "academic qualifications" => Section::Education,
        "experience" | "work experience" | "professional experience" | "employment"
        | "employment history" | "work history" | "career history" | "relevant experience" => {
            Section::Experience
        }
        "skills" | "technical skills" | "core competencies" | "competencies" | "key skills"
        | "skills & tools" | "skills and tools" | "technologies" => Section::Skills,
        "projects" | "personal projects" | "selected projects" | "key projects"
        | "academic projects" => Section::Projects,
        "certifications" | "certificates" | "licenses & certifications"
        | "licenses and certifications" | "certifications & licenses" => Section::Certifications,
        "summary" | "profile" | "professional summary" | "objective" | "about" | "about me"
        | "interests" | "languages" | "references" | "awards" | "publications" | "volunteer"
        | "volunteering" | "contact" | "contact information" => Section::Other,
        _ => return None,
    };
    Some(section)
}

impl Section {
    fn name(self) -> &'static str {
        match self {
            Section::Header => "contact",
            Section::Education => "education",
            Section::Experience => "experience",
            Section::Skills => "skills",
            Section::Projects => "projects",
            Section::Certifications => "certifications",
            Section::Other => "other",
        }
    }
}

/// Section name when `line` is a resume section heading.
pub fn section_heading(line: &str) -> Option<&'static str> {
    section_for(line).map(Section::name)
}

/// Label for text that precedes the first section heading.
pub const LEADING_SECTION: &str = "contact";

/// Text lines tagged with the section they fall under.
struct Sections<'a> {
    lines: Vec<(Section, &'a str)>,
}

impl<'a> Sections<'a> {
    fn parse(text: &'a str) -> Self {
        let mut current = Section::Header;
        let mut lines = Vec::new();
        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if let Some(section) = section_for(trimmed) {
                current = section;
                continue;
            }
            lines.push((current, trimmed));
        }
        Self { lines }
    }

    fn has(&self, section: Section) -> bool {
        self.lines.iter().any(|(s, _)| *s == section)
    }

    fn of(&self, section: Section) -> Vec<&'a str> {
        self.lines
            .iter()
            .filter(|(s, _)| *s == section)
            .map(|(_, line)| *line)
            .collect()
    }

    /// Lines of `section`, or every line when the text has no such header.
    fn of_or_all(&self, section: Section) -> Vec<&'a str> {
        if self.has(section) {
            self.of(section)
        } else {
            self.lines.iter().map(|(_, line)| *line).collect()
        }
    }
}

/// Builds a record from plain text using only local rules.
pub fn extract_offline(text: &str) -> ResumeRecord {
    let sections = Sections::parse(text);

    ResumeRecord {
        contact: Contact {
            name: find_name(text).unwrap_or_default(),
            email: find_email(text).unwrap_or_default(),
            phone: find_phone(text).unwrap_or_default(),
            address: find_address(text),
        },
        education: find_education(&sections),
        experience: find_experience(&sections),
        skills: find_skills(text, &sections),
        projects: find_projects(&sections),
        certifications: find_certifications(&sections),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Contact
// ────────────────────────────────────────────────────────────────────────────

pub fn find_email(text: &str) -> Option<String> {
    EMAIL_RE.find(text).map(|m| m.as_str().to_string())
}

pub fn find_phone(text: &str) -> Option<String> {
    PHONE_RE.find(text).map(|m| m.as_str().trim().to_string())
}

pub fn find_name(text: &str) -> Option<String> {
    if let Some(caps) = NAME_LABEL_RE.captures(text) {
        let name = label_value(&caps[1], &[',', '|', ';']);
        if !name.is_empty() {
            return Some(name);
        }
    }

    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .take(NAME_SCAN_LINES)
        .find(|line| looks_like_name(line))
        .map(str::to_string)
}

fn looks_like_name(line: &str) -> bool {
    let len = line.chars().count();
    if len <= 3 || len >= 50 {
        return false;
    }
    let lower = line.to_lowercase();
    !line.contains('@')
        && !NAME_STOPWORDS.iter().any(|w| lower.contains(w))
        && !PHONE_IN_LINE_RE.is_match(line)
        && section_for(line).is_none()
}

fn find_address(text: &str) -> Option<String> {
    ADDRESS_LABEL_RE
        .captures(text)
        .map(|caps| label_value(&caps[1], &['|', ';']))
        .filter(|s| !s.is_empty())
}

/// Value of a `Label: value` field on a line that may carry further fields.
/// Stops at any of `separators` or at the next `word:` label and drops quotes.
fn label_value(raw: &str, separators: &[char]) -> String {
    let mut value = raw.split(separators).next().unwrap_or(raw);
    if let Some(next) = NEXT_LABEL_RE.find(value) {
        value = &value[..next.start()];
    }
    value
        .trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '“' | '”'))
        .trim()
        .to_string()
}

// ────────────────────────────────────────────────────────────────────────────
// Education and experience
// ────────────────────────────────────────────────────────────────────────────

fn find_education(sections: &Sections<'_>) -> Vec<Education> {
    sections
        .of_or_all(Section::Education)
        .into_iter()
        .filter(|line| {
            let lower = line.to_lowercase();
            EDUCATION_KEYWORDS.iter().any(|k| lower.contains(k))
        })
        .take(MAX_EDUCATION)
        .map(parse_education_line)
        .collect()
}

fn parse_education_line(line: &str) -> Education {
    let line = strip_bullet(line);
    let institution = split_parts(line)
        .into_iter()
        .find(|part| {
            let lower = part.to_lowercase();
            INSTITUTION_KEYWORDS.iter().any(|k| lower.contains(k))
        })
        .unwrap_or(line);

    Education {
        institution: institution.to_string(),
        degree: DEGREE_RE
            .find(line)
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default(),
        field: FIELD_RE
            .captures(line)
            .map(|caps| caps[1].trim().to_string())
            .filter(|field| !institution.contains(field.as_str())),
        graduation_date: YEAR_RE.find_iter(line).last().map(|m| m.as_str().to_string()),
        gpa: GPA_RE.captures(line).map(|caps| caps[1].trim().to_string()),
    }
}

fn find_experience(sections: &Sections<'_>) -> Vec<Experience> {
    let lines = sections.of_or_all(Section::Experience);
    let in_section = sections.has(Section::Experience);
    let mut entries: Vec<Experience> = Vec::new();

    for line in lines {
        if let Some(caps) = DATE_RANGE_RE.captures(line) {
            if entries.len() == MAX_EXPERIENCE {
                break;
            }
            let range = caps.get(0).map(|m| (m.start(), m.end())).unwrap_or((0, 0));
            let before = trim_separators(&line[..range.0]);
            let after = trim_separators(&line[range.1..]);
            let (company, title) = split_company_title(before, after);
            entries.push(Experience {
                company,
                title,
                start_date: caps[1].trim().to_string(),
                end_date: Some(normalize_end(&caps[2])),
                description: String::new(),
            });
        } else if in_section {
            // Continuation lines describe the most recent entry
            if let Some(last) = entries.last_mut() {
                if !last.description.is_empty() {
                    last.description.push(' ');
                }
                last.description.push_str(strip_bullet(line));
            }
        }
    }
    entries
}

fn split_company_title(before: &str, after: &str) -> (String, String) {
    if let Some((title, company)) = before.split_once(" at ") {
        return (company.trim().to_string(), title.trim().to_string());
    }
    let parts = split_parts(before);
    match parts.as_slice() {
        [] => (String::new(), after.to_string()),
        [company] => (company.to_string(), after.to_string()),
        [company, rest @ ..] => (company.to_string(), rest.join(", ")),
    }
}

fn normalize_end(raw: &str) -> String {
    let raw = raw.trim();
    match raw.to_lowercase().as_str() {
        "present" | "current" | "now" => "Present".to_string(),
        _ => raw.to_string(),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Skills, projects, certifications
// ────────────────────────────────────────────────────────────────────────────

fn find_skills(text: &str, sections: &Sections<'_>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut skills = Vec::new();
    let mut push = |skill: &str| {
        if seen.insert(skill.to_lowercase()) {
            skills.push(skill.to_string());
        }
    };

    for line in sections.of(Section::Skills) {
        let line = strip_bullet(line);
        // "Languages: Rust, Go" lists its items after the label
        let items = line.split_once(':').map(|(_, rest)| rest).unwrap_or(line);
        for item in items.split([',', ';', '|', '•']) {
            let item = item.trim().trim_end_matches('.');
            if !item.is_empty() && item.chars().count() <= MAX_SKILL_ITEM_CHARS {
                push(item);
            }
        }
    }
    for skill in keyword_skills(text) {
        push(skill);
    }
    skills
}

fn keyword_skills(text: &str) -> Vec<&'static str> {
    SKILL_PATTERNS
        .iter()
        .filter(|(re, _)| re.is_match(text))
        .map(|(_, display)| *display)
        .collect()
}

fn find_projects(sections: &Sections<'_>) -> Vec<Project> {
    let mut projects: Vec<Project> = Vec::new();
    for line in sections.of(Section::Projects) {
        if let Some(caps) = TECH_LABEL_RE.captures(line) {
            if let Some(project) = projects.last_mut() {
                project.technologies.extend(
                    caps[1]
                        .split([',', ';', '|'])
                        .map(str::trim)
                        .filter(|t| !t.is_empty())
                        .map(str::to_string),
                );
            }
            continue;
        }
        if is_bullet(line) {
            if let Some(project) = projects.last_mut() {
                if !project.description.is_empty() {
                    project.description.push(' ');
                }
                project.description.push_str(strip_bullet(line));
                continue;
            }
        }
        projects.push(Project {
            name: trim_separators(strip_bullet(line)).to_string(),
            ..Default::default()
        });
    }

    for project in &mut projects {
        let haystack = format!("{} {}", project.name, project.description);
        for skill in keyword_skills(&haystack) {
            if !project.technologies.iter().any(|t| t.eq_ignore_ascii_case(skill)) {
                project.technologies.push(skill.to_string());
            }
        }
    }
    projects
}

fn find_certifications(sections: &Sections<'_>) -> Vec<String> {
    let lines: Vec<&str> = if sections.has(Section::Certifications) {
        sections.of(Section::Certifications)
    } else {
        sections
            .lines
            .iter()
            .map(|(_, line)| *line)
            .filter(|line| {
                let lower = line.to_lowercase();
                lower.contains("certified") || lower.contains("certification")
            })
            .collect()
    };
    lines
        .into_iter()
        .map(|line| strip_bullet(line).to_string())
        .filter(|line| !line.is_empty())
        .take(MAX_CERTIFICATIONS)
        .collect()
}

// ────────────────────────────────────────────────────────────────────────────
// Helpers
// ────────────────────────────────────────────────────────────────────────────

fn is_bullet(line: &str) -> bool {
    line.starts_with(BULLETS)
}

fn strip_bullet(line: &str) -> &str {
    line.trim_start_matches(BULLETS).trim()
}

fn trim_separators(s: &str) -> &str {
    s.trim_matches(|c: char| c.is_whitespace() || matches!(c, ',' | '|' | '-' | '–' | '—' | '(' | ')' | ':'))
}

fn split_parts(line: &str) -> Vec<&str> {
    line.split([',', '|'])
        .flat_map(|part| part.split(" - "))
        .flat_map(|part| part.split(" – "))
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect()
}
