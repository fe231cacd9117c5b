use std::collections::BTreeSet;

use camino::Utf8PathBuf;
use serde::Serialize;

use crate::domain::{BoundingBox, Month};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchiveRequest {
    pub product_type: String,
    pub format: String,
    pub variable: Vec<String>,
    pub year: String,
    pub month: Vec<String>,
    pub area: String,
    pub day: Vec<String>,
    pub time: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionTask {
    pub year: i32,
    pub month: Month,
    pub destination: Utf8PathBuf,
    pub request: ArchiveRequest,
}

impl AcquisitionTask {
    pub fn label(&self) -> String {
        format!("{}-{}", self.year, self.month)
    }
}

#[derive(Debug, Clone)]
pub struct RequestTemplate {
    pub output_dir: Utf8PathBuf,
    pub file_prefix: String,
    pub product_type: String,
    pub format: String,
    pub variables: Vec<String>,
}

impl RequestTemplate {
    pub fn file_extension(&self) -> &str {
        match self.format.as_str() {
            "netcdf" => "nc",
            other => other,
        }
    }

    pub fn destination(&self, year: i32, month: Month) -> Utf8PathBuf {
        self.output_dir.join(format!(
            "{}_{year}-{month}.{}",
            self.file_prefix,
            self.file_extension()
        ))
    }
}

pub fn build_grid<Y, M>(
    years: Y,
    months: M,
    bbox: &BoundingBox,
    template: &RequestTemplate,
) -> Vec<AcquisitionTask>
where
    Y: IntoIterator<Item = i32>,
    M: IntoIterator<Item = Month>,
{
    let years: BTreeSet<i32> = years.into_iter().collect();
    let months: BTreeSet<Month> = months.into_iter().collect();
    let area = bbox.to_string();

    let mut tasks = Vec::with_capacity(years.len() * months.len());
    for &year in &years {
        for &month in &months {
            tasks.push(AcquisitionTask {
                year,
                month,
                destination: template.destination(year, month),
                request: ArchiveRequest {
                    product_type: template.product_type.clone(),
                    format: template.format.clone(),
                    variable: template.variables.clone(),
                    year: year.to_string(),
                    month: vec![month.to_string()],
                    area: area.clone(),
                    day: all_days(),
                    time: all_hours(),
                },
            });
        }
    }
    tasks
}

// Days past the end of a short month are left in; the archive ignores them.
fn all_days() -> Vec<String> {
    (1..=31).map(|day| format!("{day:02}")).collect()
}

fn all_hours() -> Vec<String> {
    (0..24).map(|hour| format!("{hour:02}:00")).collect()
}
