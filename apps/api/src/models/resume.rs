use serde::{Deserialize, Serialize};

/// Structured resume extracted from a single document.
///
/// Field order is the export order: `contact`, `education`, `experience`,
/// `skills`, `projects`, `certifications`. List fields default to empty and
/// optional scalars to `null`, so a sparse record is still structurally valid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResumeRecord {
    pub contact: Contact,
    pub education: Vec<Education>,
    pub experience: Vec<Experience>,
    pub skills: Vec<String>,
    pub projects: Vec<Project>,
    pub certifications: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Contact {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub address: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Education {
    pub institution: String,
    pub degree: String,
    pub field: Option<String>,
    pub graduation_date: Option<String>,
    pub gpa: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Experience {
    pub company: String,
    pub title: String,
    pub start_date: String,
    pub end_date: Option<String>,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Project {
    pub name: String,
    pub description: String,
    pub technologies: Vec<String>,
}

impl ResumeRecord {
    /// Fills every empty field of `self` from `fallback`.
    ///
    /// Scalars keep their own value when non-empty; lists keep their own items
    /// when non-empty, otherwise take the fallback's list wholesale.
    pub fn merge_missing_from(&mut self, fallback: ResumeRecord) {
        let c = &mut self.contact;
        if c.name.trim().is_empty() {
            c.name = fallback.contact.name;
        }
        if c.email.trim().is_empty() {
            c.email = fallback.contact.email;
        }
        if c.phone.trim().is_empty() {
            c.phone = fallback.contact.phone;
        }
        if c.address.is_none() {
            c.address = fallback.contact.address;
        }
        if self.education.is_empty() {
            self.education = fallback.education;
        }
        if self.experience.is_empty() {
            self.experience = fallback.experience;
        }
        if self.skills.is_empty() {
            self.skills = fallback.skills;
        }
        if self.projects.is_empty() {
            self.projects = fallback.projects;
        }
        if self.certifications.is_empty() {
            self.certifications = fallback.certifications;
        }
    }

    /// Lossless JSON export with keys in schema order.
    pub fn to_export_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
