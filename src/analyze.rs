//! Statistics over the stored doctors: ratings, shared phone numbers and
//! providers practicing at several locations.

use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use serde::Serialize;

use crate::{doctor::DoctorRecord, Error};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub summary: Summary,
    /// Phone number -> every doctor listing it, for numbers listed more than once.
    pub shared_phone_numbers: BTreeMap<String, Vec<DoctorRef>>,
    pub doctors_with_multiple_locations: Vec<DoctorRef>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total_doctors: usize,
    pub doctors_with_ratings: usize,
    pub shared_phone_numbers: usize,
    pub doctors_with_multiple_locations: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DoctorRef {
    pub name: String,
    pub profile_url: Option<String>,
    #[serde(skip)]
    pub specialty: Option<String>,
}

impl DoctorRef {
    fn display(&self) -> String {
        format!(
            "{} ({})",
            self.name,
            self.specialty.as_deref().unwrap_or("No specialty listed")
        )
    }
}

impl From<&DoctorRecord> for DoctorRef {
    fn from(record: &DoctorRecord) -> Self {
        Self {
            name: record.doctor.name.clone(),
            profile_url: record.doctor.profile_url.clone(),
            specialty: record.doctor.specialty.clone(),
        }
    }
}

pub fn analyze(doctors: &[DoctorRecord]) -> Report {
    let doctors_with_ratings = doctors.iter().filter(|r| r.doctor.has_rating()).count();

    let mut by_phone: BTreeMap<String, Vec<DoctorRef>> = BTreeMap::new();
    for record in doctors {
        if let Some(phone) = record.doctor.phone.as_deref().filter(|p| !p.is_empty()) {
            by_phone.entry(phone.to_owned()).or_default().push(record.into());
        }
    }
    by_phone.retain(|_, sharing| sharing.len() > 1);

    let doctors_with_multiple_locations: Vec<DoctorRef> = doctors
        .iter()
        .filter(|r| r.doctor.has_multiple_locations)
        .map(DoctorRef::from)
        .collect();

    Report {
        summary: Summary {
            total_doctors: doctors.len(),
            doctors_with_ratings,
            shared_phone_numbers: by_phone.len(),
            doctors_with_multiple_locations: doctors_with_multiple_locations.len(),
        },
        shared_phone_numbers: by_phone,
        doctors_with_multiple_locations,
    }
}

/// Share of `part` in `total`, in percent. Zero when there is nothing to divide.
fn percent(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

impl Report {
    /// Writes the findings to the log, detail first, then a summary block.
    pub fn log(&self) {
        let Summary {
            total_doctors,
            doctors_with_ratings,
            shared_phone_numbers,
            doctors_with_multiple_locations,
        } = self.summary;

        tracing::info!("Total number of doctors: {}", total_doctors);
        tracing::info!(
            "Doctors with ratings: {} ({:.1}%)",
            doctors_with_ratings,
            percent(doctors_with_ratings, total_doctors)
        );

        tracing::info!(
            "Found {} phone numbers shared by multiple doctors:",
            shared_phone_numbers
        );
        for (phone, doctors) in &self.shared_phone_numbers {
            tracing::info!("  Phone: {}", phone);
            for doctor in doctors {
                tracing::info!("    - {}", doctor.display());
            }
        }

        tracing::info!(
            "Doctors with multiple locations: {} ({:.1}%)",
            doctors_with_multiple_locations,
            percent(doctors_with_multiple_locations, total_doctors)
        );
        for doctor in &self.doctors_with_multiple_locations {
            tracing::info!("  - {}", doctor.display());
        }

        tracing::info!("SUMMARY REPORT:");
        tracing::info!("Total doctors: {}", total_doctors);
        tracing::info!("Doctors with ratings: {}", doctors_with_ratings);
        tracing::info!("Number of shared phone numbers: {}", shared_phone_numbers);
        tracing::info!("Doctors with multiple locations: {}", doctors_with_multiple_locations);
    }

    /// Exports the report as indented JSON.
    pub fn write_json(&self, path: &Path) -> Result<(), Error> {
        let file = File::create(path).map_err(|err| {
            tracing::error!("failed creating report file {}", path.display());
            err
        })?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        tracing::info!("Analysis report exported as {}", path.display());
        Ok(())
    }
}
