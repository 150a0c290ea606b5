//! Result capture and tabular export per execution context.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{CampaignError, CampaignResult};
use crate::platform::{Activation, ObjectHandle, Platform, Session, Value};

/// Measurement block variables recorded for every case.
pub const MEASURED_VARIABLES: [&str; 20] = [
    "s:Ia_pu",
    "s:Ib_pu",
    "s:Ic_pu",
    "s:Vab_pu",
    "s:Vag_pu",
    "s:Vbc_pu",
    "s:Vbg_pu",
    "s:Vca_pu",
    "s:Vcg_pu",
    "s:f_hz",
    "s:neg_Id_pu",
    "s:neg_Imag_pu",
    "s:neg_Iq_pu",
    "s:neg_Vmag_pu",
    "s:pos_Id_pu",
    "s:pos_Imag_pu",
    "s:pos_Iq_pu",
    "s:pos_Vmag_pu",
    "s:ppoc_pu",
    "s:qpoc_pu",
];

/// Reference signal blocks whose output is recorded.
pub const REFERENCE_BLOCKS: [&str; 12] = [
    "mtb_s_pref_pu",
    "mtb_s_qref_pu",
    "mtb_s_1",
    "mtb_s_2",
    "mtb_s_3",
    "mtb_s_4",
    "mtb_s_5",
    "mtb_s_6",
    "mtb_s_7",
    "mtb_s_8",
    "mtb_s_9",
    "mtb_s_10",
];

/// Output variable of a reference block.
pub const REFERENCE_OUTPUT: &str = "s:yo";

pub const MEASUREMENT_BLOCK: &str = "measurements";

/// Export file of one case: `{export_dir}/{project}_{rank}.csv`.
pub fn export_path(export_dir: &Path, project: &str, rank: u32) -> PathBuf {
    export_dir.join(format!("{}_{}.csv", project, rank))
}

/// Deferred export job of one context.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportDescriptor {
    pub rank: u32,
    pub study_case: ObjectHandle,
    pub result_set: ObjectHandle,
    pub path: PathBuf,
}

/// Model objects whose variables are captured.
#[derive(Debug, Clone)]
struct CaptureTargets {
    measurements: ObjectHandle,
    references: Vec<ObjectHandle>,
}

/// Declares the captured variables and runs the per-context exports.
#[derive(Debug, Clone)]
pub struct ResultExporter {
    export_dir: PathBuf,
    project: String,
    targets: CaptureTargets,
}

impl ResultExporter {
    /// Locate the measurement and reference blocks below the test-bench root.
    pub fn locate<P: Platform>(
        platform: &mut P,
        model_root: ObjectHandle,
        export_dir: impl Into<PathBuf>,
        project: impl Into<String>,
    ) -> CampaignResult<Self> {
        let mut find = |name: &str| -> CampaignResult<ObjectHandle> {
            let path = format!("{}.ElmDsl", name);
            platform
                .search(model_root, &path)?
                .ok_or(CampaignError::ObjectNotFound(path))
        };

        let measurements = find(MEASUREMENT_BLOCK)?;
        let references = REFERENCE_BLOCKS
            .iter()
            .map(|name| find(name))
            .collect::<CampaignResult<Vec<_>>>()?;

        Ok(Self {
            export_dir: export_dir.into(),
            project: project.into(),
            targets: CaptureTargets {
                measurements,
                references,
            },
        })
    }

    pub fn export_dir(&self) -> &Path {
        &self.export_dir
    }

    pub fn path_for(&self, rank: u32) -> PathBuf {
        export_path(&self.export_dir, &self.project, rank)
    }

    /// Register the captured variables on the active study case's result set.
    pub fn capture<P: Platform>(&self, platform: &mut P) -> CampaignResult<ObjectHandle> {
        let result_set = platform
            .from_study_case("ElmRes")?
            .ok_or(CampaignError::NoActiveStudyCase)?;

        for variable in MEASURED_VARIABLES {
            platform.execute(
                result_set,
                "AddVariable",
                &[self.targets.measurements.into(), variable.into()],
            )?;
        }
        for block in &self.targets.references {
            platform.execute(
                result_set,
                "AddVariable",
                &[(*block).into(), REFERENCE_OUTPUT.into()],
            )?;
        }
        Ok(result_set)
    }

    /// Configure the active study case's export job.
    pub fn configure<P: Platform>(
        &self,
        platform: &mut P,
        rank: u32,
        study_case: ObjectHandle,
        result_set: ObjectHandle,
    ) -> CampaignResult<ExportDescriptor> {
        let descriptor = ExportDescriptor {
            rank,
            study_case,
            result_set,
            path: self.path_for(rank),
        };
        apply_export_settings(platform, &descriptor)?;
        Ok(descriptor)
    }

    /// Reactivate the context, run its export and release it again.
    ///
    /// Settings are re-applied first, so exporting twice rewrites the same file.
    pub fn export<P: Platform>(
        &self,
        session: &mut Session<P>,
        descriptor: &ExportDescriptor,
    ) -> CampaignResult<()> {
        session.with_context(descriptor.study_case, Activation::Export, |platform| {
            let com_res = apply_export_settings(platform, descriptor)?;
            platform.execute(com_res, "Execute", &[])?;
            platform.write_changes()
        })?;
        tracing::info!(rank = descriptor.rank, path = %descriptor.path.display(), "Results exported");
        Ok(())
    }
}

fn apply_export_settings<P: Platform>(
    platform: &mut P,
    descriptor: &ExportDescriptor,
) -> CampaignResult<ObjectHandle> {
    let com_res = platform
        .from_study_case("ComRes")?
        .ok_or(CampaignError::NoActiveStudyCase)?;

    let settings: [(&str, Value); 7] = [
        ("pResult", descriptor.result_set.into()),
        ("iopt_exp", Value::Int(6)),
        ("iopt_sep", Value::Int(0)),
        ("ciopt_head", Value::Int(1)),
        ("dec_Sep", ",".into()),
        ("col_Sep", ";".into()),
        ("f_name", descriptor.path.display().to_string().into()),
    ];
    for (name, value) in settings {
        platform.set_attribute(com_res, name, value)?;
    }
    Ok(com_res)
}
