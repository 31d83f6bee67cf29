//! 정렬 가능한 버전 문자열
//!
//! SemVer 순서는 문자열 순서와 다릅니다 (`v1.10.0` < `v1.9.0` 문자열 비교).
//! [`for_sorting`]은 문자열 비교가 SemVer 순서와 일치하는 형태로 변환합니다.
//!
//! ```text
//! v1.2.3            -> 00000000000000000001,00000000000000000002,00000000000000000003~
//! v1.2.3-rc.10      -> 00000000000000000001,00000000000000000002,00000000000000000003-rc #0210
//! ```
//!
//! - major/minor/patch: 20자리 0 채움, `,`로 연결
//! - 정식 릴리스: 접미어 `~` (모든 프리릴리스보다 큼)
//! - 프리릴리스: `-` 뒤에 식별자를 공백으로 연결
//! - 숫자 식별자: `#` + 2자리 길이 + 숫자 (문자 식별자보다 작음)
//! - 빌드 메타데이터(`+incompatible`)는 무시

use semver::Version;

const NUMBER_WIDTH: usize = 20;

/// 정렬 가능한 형태로 변환합니다.
///
/// SemVer로 파싱되지 않는 문자열은 그대로 반환합니다.
pub fn for_sorting(version: &str) -> String {
    let trimmed = version.strip_prefix('v').unwrap_or(version);
    let Ok(parsed) = Version::parse(trimmed) else {
        return version.to_owned();
    };

    let mut out = format!(
        "{:0w$},{:0w$},{:0w$}",
        parsed.major,
        parsed.minor,
        parsed.patch,
        w = NUMBER_WIDTH
    );

    if parsed.pre.is_empty() {
        out.push('~');
        return out;
    }

    out.push('-');
    let identifiers: Vec<String> = parsed.pre.as_str().split('.').map(encode_identifier).collect();
    out.push_str(&identifiers.join(" "));
    out
}

/// `v` 접두어가 붙은 SemVer 버전인지 여부
///
/// `latest`나 브랜치 이름 같은 질의는 다운로드해야 실제 버전을 알 수 있습니다.
pub fn is_canonical(version: &str) -> bool {
    version
        .strip_prefix('v')
        .is_some_and(|v| Version::parse(v).is_ok())
}

fn encode_identifier(identifier: &str) -> String {
    if !identifier.is_empty() && identifier.bytes().all(|b| b.is_ascii_digit()) {
        format!("#{:02}{identifier}", identifier.len())
    } else {
        identifier.to_owned()
    }
}
