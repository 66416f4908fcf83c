use crate::config::Config;

/// Input formats headless LibreOffice can open.
pub const LIBREOFFICE_INPUTS: &[&str] = &[
    "123", "602", "abw", "bib", "bmp", "cdr", "cgm", "cmx", "csv", "cwk", "dbf", "dif", "doc",
    "docm", "docx", "dot", "dotm", "dotx", "dxf", "emf", "eps", "epub", "fodg", "fodp", "fods",
    "fodt", "fopd", "gif", "htm", "html", "hwp", "jpeg", "jpg", "key", "ltx", "lwp", "mcw", "met",
    "mml", "mw", "numbers", "odd", "odg", "odm", "odp", "ods", "odt", "otg", "oth", "otp", "ots",
    "ott", "pages", "pbm", "pcd", "pct", "pcx", "pdb", "pdf", "pgm", "png", "pot", "potm", "potx",
    "ppm", "pps", "ppt", "pptm", "pptx", "psd", "psw", "pub", "pwp", "pxl", "ras", "rtf", "sda",
    "sdc", "sdd", "sdp", "sdw", "sgl", "slk", "smf", "stc", "std", "sti", "stw", "svg", "svm",
    "swf", "sxc", "sxd", "sxg", "sxi", "sxm", "sxw", "tga", "tif", "tiff", "txt", "uof", "uop",
    "uos", "uot", "vdx", "vor", "vsd", "vsdm", "vsdx", "wb2", "wk1", "wks", "wmf", "wpd", "wpg",
    "wps", "xbm", "xhtml", "xls", "xlsb", "xlsm", "xlsx", "xlt", "xltm", "xltx", "xlw", "xml",
    "xpm", "zabw",
];

/// The effective extension set, computed once at provisioning time.
pub fn resolve(cfg: &Config) -> Vec<String> {
    let base: Vec<String> = if cfg.extensions.override_list.is_empty() {
        LIBREOFFICE_INPUTS.iter().map(|s| s.to_string()).collect()
    } else {
        cfg.extensions
            .override_list
            .iter()
            .map(|s| normalize(s))
            .collect()
    };

    let exclude: Vec<String> = cfg.extensions.exclude.iter().map(|s| normalize(s)).collect();
    let mut out: Vec<String> = base
        .into_iter()
        .filter(|e| !e.is_empty() && !exclude.contains(e))
        .collect();
    out.sort();
    out.dedup();
    out
}

fn normalize(raw: &str) -> String {
    raw.trim().trim_start_matches('.').to_ascii_lowercase()
}
