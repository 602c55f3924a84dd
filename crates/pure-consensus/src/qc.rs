use pure_core::{verify, BlockHeader, PublicKey, QuorumCertificate, Sig, ValidatorSignature};
use tracing::debug;

use crate::error::ConsensusError;
use crate::quorum::quorum;

/// Quorum certificate from the first `threshold` filled slots, in roster order
pub fn collect_qc(
    signatures: &[Option<Sig>],
    threshold: usize,
) -> Result<QuorumCertificate, ConsensusError> {
    let collected: Vec<ValidatorSignature> = signatures
        .iter()
        .enumerate()
        .filter_map(|(index, slot)| slot.as_ref().map(|signature| (index, *signature)))
        .take(threshold)
        .map(|(index, signature)| {
            let validator_index = u16::try_from(index)
                .map_err(|_| ConsensusError::UnknownValidator(index))?;
            Ok(ValidatorSignature {
                validator_index,
                signature,
            })
        })
        .collect::<Result<_, ConsensusError>>()?;

    if collected.len() < threshold {
        return Err(ConsensusError::InsufficientSignatures {
            have: collected.len(),
            need: threshold,
        });
    }

    debug!("Collected quorum certificate with {} signatures", collected.len());
    Ok(QuorumCertificate {
        signatures: collected,
    })
}

/// Verify that `qc` holds a quorum of distinct roster signatures over `header`
pub fn verify_qc(
    header: &BlockHeader,
    qc: &QuorumCertificate,
    validators: &[PublicKey],
) -> Result<(), ConsensusError> {
    let threshold = quorum(validators.len());
    if qc.signature_count() < threshold {
        return Err(ConsensusError::InsufficientSignatures {
            have: qc.signature_count(),
            need: threshold,
        });
    }

    let header_hash = header.hash()?;
    let mut previous: Option<u16> = None;
    for vs in &qc.signatures {
        // Strictly ascending indices rule out counting one validator twice
        if previous.is_some_and(|p| vs.validator_index <= p) {
            return Err(ConsensusError::InvalidQc(format!(
                "validator {} out of order",
                vs.validator_index
            )));
        }
        previous = Some(vs.validator_index);

        let index = usize::from(vs.validator_index);
        let validator = validators
            .get(index)
            .ok_or(ConsensusError::UnknownValidator(index))?;
        verify(validator, header_hash.as_bytes(), &vs.signature)
            .map_err(|_| ConsensusError::InvalidSignature(index))?;
    }

    Ok(())
}
